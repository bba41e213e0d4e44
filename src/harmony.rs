use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Valid Camelot code syntax: number 1-12 followed by A (minor) or B (major).
fn camelot_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(1[0-2]|[1-9])[AB]$").unwrap())
}

/// Major or minor mode; `A` is the minor ring of the wheel, `B` the major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyMode {
    Major,
    Minor,
}

impl KeyMode {
    pub fn letter(self) -> char {
        match self {
            KeyMode::Major => 'B',
            KeyMode::Minor => 'A',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KeyMode::Major => "major",
            KeyMode::Minor => "minor",
        }
    }
}

/// A position on the Camelot wheel, e.g. `8B` for C major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CamelotCode {
    /// Wheel position, 1..=12.
    pub number: u8,
    pub mode: KeyMode,
}

impl CamelotCode {
    pub fn new(number: u8, mode: KeyMode) -> Option<Self> {
        (1..=12).contains(&number).then_some(Self { number, mode })
    }

    /// The relative major/minor partner: same number, other ring.
    pub fn relative(self) -> Self {
        let mode = match self.mode {
            KeyMode::Major => KeyMode::Minor,
            KeyMode::Minor => KeyMode::Major,
        };
        Self { number: self.number, mode }
    }

    /// Step around the 12-cycle; `delta` may be negative.
    pub fn step(self, delta: i8) -> Self {
        let n = (self.number as i16 - 1 + delta as i16).rem_euclid(12) as u8 + 1;
        Self { number: n, mode: self.mode }
    }

    /// Shortest distance between two positions on the 12-cycle.
    fn ring_distance(self, other: Self) -> u8 {
        let d = (self.number as i16 - other.number as i16).rem_euclid(12) as u8;
        d.min(12 - d)
    }
}

impl fmt::Display for CamelotCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.number, self.mode.letter())
    }
}

impl FromStr for CamelotCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !camelot_re().is_match(s) {
            return Err(format!("invalid Camelot code: {s:?}"));
        }
        let (num, letter) = s.split_at(s.len() - 1);
        let number: u8 = num.parse().map_err(|_| format!("invalid Camelot code: {s:?}"))?;
        let mode = if letter == "B" { KeyMode::Major } else { KeyMode::Minor };
        CamelotCode::new(number, mode).ok_or_else(|| format!("invalid Camelot code: {s:?}"))
    }
}

impl Serialize for CamelotCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CamelotCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Chromatic pitch-class names, sharps preferred.
const TONICS: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Camelot wheel number for each major tonic, indexed by pitch class.
/// C=8B, G=9B, D=10B, A=11B, E=12B, B=1B, F#=2B, C#=3B, G#=4B, D#=5B, A#=6B, F=7B.
const MAJOR_WHEEL: [u8; 12] = [8, 3, 10, 5, 12, 7, 2, 9, 4, 11, 6, 1];

/// Camelot wheel number for each minor tonic, indexed by pitch class.
/// Am=8A, Em=9A, Bm=10A, F#m=11A, C#m=12A, G#m=1A, D#m=2A, A#m=3A, Fm=4A, Cm=5A, Gm=6A, Dm=7A.
const MINOR_WHEEL: [u8; 12] = [5, 12, 7, 2, 9, 4, 11, 6, 1, 8, 3, 10];

/// Map a pitch-class name to its chromatic index, accepting flats.
fn tonic_index(name: &str) -> Option<usize> {
    let canonical = match name {
        "Db" => "C#",
        "Eb" => "D#",
        "Gb" => "F#",
        "Ab" => "G#",
        "Bb" => "A#",
        "Cb" => "B",
        "Fb" => "E",
        other => other,
    };
    TONICS.iter().position(|t| *t == canonical)
}

/// Parse a key string into (chromatic tonic index 0..11, mode).
///
/// Accepts short forms (`C`, `Am`, `F#`, `Bbm`) and long forms
/// (`C Major`, `A Minor`, case-insensitive on the mode word).
pub fn parse_key(key: &str) -> Option<(usize, KeyMode)> {
    let key = key.trim();
    if key.is_empty() || key.eq_ignore_ascii_case("unknown") {
        return None;
    }

    // Long form: "<tonic> Major" / "<tonic> Minor"
    if let Some((tonic, mode_word)) = key.split_once(' ') {
        let mode = if mode_word.eq_ignore_ascii_case("major") {
            KeyMode::Major
        } else if mode_word.eq_ignore_ascii_case("minor") {
            KeyMode::Minor
        } else {
            return None;
        };
        return tonic_index(tonic).map(|i| (i, mode));
    }

    // Short form: trailing 'm' marks minor
    if let Some(tonic) = key.strip_suffix('m') {
        return tonic_index(tonic).map(|i| (i, KeyMode::Minor));
    }
    tonic_index(key).map(|i| (i, KeyMode::Major))
}

/// The Camelot wheel: key/scale ↔ code mapping and the compatibility relation
/// used by the playlist optimizer.
#[derive(Debug, Clone, Copy)]
pub struct HarmonyModel {
    /// When set, ±2 wheel neighbours also score as mixable.
    relaxed: bool,
}

impl Default for HarmonyModel {
    fn default() -> Self {
        Self::new()
    }
}

impl HarmonyModel {
    pub fn new() -> Self {
        Self { relaxed: false }
    }

    /// Widen `score` to award ±2 neighbours; `compatible` stays tight.
    pub fn relaxed() -> Self {
        Self { relaxed: true }
    }

    /// Map a key string to its Camelot code, if the key is recognized.
    pub fn to_camelot(&self, key: &str) -> Option<CamelotCode> {
        let (idx, mode) = parse_key(key)?;
        let number = match mode {
            KeyMode::Major => MAJOR_WHEEL[idx],
            KeyMode::Minor => MINOR_WHEEL[idx],
        };
        CamelotCode::new(number, mode)
    }

    /// Render a Camelot code back into a key name like "C Major".
    pub fn key_name(&self, code: CamelotCode) -> String {
        let wheel = match code.mode {
            KeyMode::Major => &MAJOR_WHEEL,
            KeyMode::Minor => &MINOR_WHEEL,
        };
        let idx = wheel.iter().position(|n| *n == code.number).unwrap_or(0);
        let mode_word = match code.mode {
            KeyMode::Major => "Major",
            KeyMode::Minor => "Minor",
        };
        format!("{} {}", TONICS[idx], mode_word)
    }

    /// Harmonically compatible codes: same-ring ±1 around the cycle plus the
    /// relative major/minor. The relation is symmetric.
    pub fn compatible(&self, code: CamelotCode) -> Vec<CamelotCode> {
        vec![code.relative(), code.step(1), code.step(-1)]
    }

    /// Transition quality in [0, 1]: 1.0 for the same key, 0.9 for the
    /// relative pair, 0.7 for adjacent wheel positions, 0.1 otherwise.
    pub fn score(&self, a: CamelotCode, b: CamelotCode) -> f64 {
        if a == b {
            return 1.0;
        }
        if a.relative() == b {
            return 0.9;
        }
        if a.mode == b.mode {
            let d = a.ring_distance(b);
            if d == 1 {
                return 0.7;
            }
            if self.relaxed && d == 2 {
                return 0.7;
            }
        }
        0.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(s: &str) -> CamelotCode {
        s.parse().unwrap()
    }

    #[test]
    fn test_code_syntax() {
        assert!("1A".parse::<CamelotCode>().is_ok());
        assert!("12B".parse::<CamelotCode>().is_ok());
        assert!("0A".parse::<CamelotCode>().is_err());
        assert!("13B".parse::<CamelotCode>().is_err());
        assert!("8C".parse::<CamelotCode>().is_err());
        assert!("8".parse::<CamelotCode>().is_err());
        assert!("08B".parse::<CamelotCode>().is_err());
        assert!("".parse::<CamelotCode>().is_err());
    }

    #[test]
    fn test_key_mapping() {
        let h = HarmonyModel::new();
        assert_eq!(h.to_camelot("C").unwrap(), code("8B"));
        assert_eq!(h.to_camelot("Am").unwrap(), code("8A"));
        assert_eq!(h.to_camelot("F#").unwrap(), code("2B"));
        assert_eq!(h.to_camelot("G#m").unwrap(), code("1A"));
        assert_eq!(h.to_camelot("C Major").unwrap(), code("8B"));
        assert_eq!(h.to_camelot("A Minor").unwrap(), code("8A"));
        // Flats are enharmonic with sharps
        assert_eq!(h.to_camelot("Bbm").unwrap(), code("3A"));
        assert_eq!(h.to_camelot("Db Major").unwrap(), code("3B"));
        assert!(h.to_camelot("H").is_none());
        assert!(h.to_camelot("Unknown").is_none());
        assert!(h.to_camelot("").is_none());
    }

    #[test]
    fn test_key_name_roundtrip() {
        let h = HarmonyModel::new();
        for number in 1..=12u8 {
            for mode in [KeyMode::Major, KeyMode::Minor] {
                let c = CamelotCode::new(number, mode).unwrap();
                assert_eq!(h.to_camelot(&h.key_name(c)).unwrap(), c);
            }
        }
    }

    #[test]
    fn test_compatible_set() {
        let h = HarmonyModel::new();
        let mut got: Vec<String> = h.compatible(code("8B")).iter().map(|c| c.to_string()).collect();
        got.sort();
        assert_eq!(got, vec!["7B", "8A", "9B"]);

        // Wrap-around at both ends of the cycle
        let got: Vec<String> = h.compatible(code("1A")).iter().map(|c| c.to_string()).collect();
        assert!(got.contains(&"12A".to_string()));
        assert!(got.contains(&"2A".to_string()));
        assert!(got.contains(&"1B".to_string()));
    }

    #[test]
    fn test_compatibility_symmetric() {
        let h = HarmonyModel::new();
        for n in 1..=12u8 {
            for m in [KeyMode::Major, KeyMode::Minor] {
                let a = CamelotCode::new(n, m).unwrap();
                for other in h.compatible(a) {
                    assert!(h.compatible(other).contains(&a), "{a} -> {other} not symmetric");
                }
            }
        }
    }

    #[test]
    fn test_score_tiers() {
        let h = HarmonyModel::new();
        assert_eq!(h.score(code("8B"), code("8B")), 1.0);
        assert_eq!(h.score(code("8B"), code("8A")), 0.9);
        assert_eq!(h.score(code("8B"), code("9B")), 0.7);
        assert_eq!(h.score(code("8B"), code("7B")), 0.7);
        assert_eq!(h.score(code("8B"), code("10B")), 0.1);
        assert_eq!(h.score(code("8B"), code("3A")), 0.1);
        // Wrap-around adjacency
        assert_eq!(h.score(code("12A"), code("1A")), 0.7);
    }

    #[test]
    fn test_score_relaxed_tier() {
        let relaxed = HarmonyModel::relaxed();
        assert_eq!(relaxed.score(code("8B"), code("10B")), 0.7);
        assert_eq!(relaxed.score(code("8B"), code("11B")), 0.1);
        // Relaxed scoring does not widen the compatible set
        assert_eq!(relaxed.compatible(code("8B")).len(), 3);
    }

    #[test]
    fn test_score_symmetric_and_reflexive() {
        let h = HarmonyModel::new();
        let codes: Vec<CamelotCode> = (1..=12)
            .flat_map(|n| {
                [KeyMode::Major, KeyMode::Minor]
                    .into_iter()
                    .map(move |m| CamelotCode::new(n, m).unwrap())
            })
            .collect();
        for &a in &codes {
            assert_eq!(h.score(a, a), 1.0);
            for &b in &codes {
                assert_eq!(h.score(a, b), h.score(b, a), "score({a},{b}) asymmetric");
            }
        }
    }

    #[test]
    fn test_parse_key_numeric_index() {
        assert_eq!(parse_key("C"), Some((0, KeyMode::Major)));
        assert_eq!(parse_key("B"), Some((11, KeyMode::Major)));
        assert_eq!(parse_key("F#m"), Some((6, KeyMode::Minor)));
        assert_eq!(parse_key("A Minor"), Some((9, KeyMode::Minor)));
    }

    #[test]
    fn test_serde_roundtrip() {
        let c = code("11A");
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "\"11A\"");
        let back: CamelotCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
        assert!(serde_json::from_str::<CamelotCode>("\"13A\"").is_err());
    }
}
