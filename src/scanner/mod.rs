pub mod metadata;

use crate::SUPPORTED_EXTENSIONS;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Filters applied while walking the library directories.
#[derive(Debug, Clone)]
pub struct EnumerateOptions {
    pub max_depth: usize,
    pub min_file_size_kb: u64,
    /// A file must match at least one include pattern, when any are given.
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

impl Default for EnumerateOptions {
    fn default() -> Self {
        Self {
            max_depth: 10,
            min_file_size_kb: 100,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }
}

/// Pattern semantics shared by include and exclude lists:
/// `*/name` matches a directory-name segment anywhere on the path,
/// patterns containing `*` match against the basename, and plain
/// patterns match as substrings of the full path.
fn pattern_matches(pattern: &str, path: &Path) -> bool {
    if let Some(segment) = pattern.strip_prefix("*/") {
        return path
            .components()
            .any(|c| wildcard_match(segment, &c.as_os_str().to_string_lossy()));
    }
    if pattern.contains('*') {
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        return wildcard_match(pattern, &name);
    }
    path.to_string_lossy().contains(pattern)
}

/// Minimal `*` glob: matches any run of characters, case-sensitive.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !text.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if i == parts.len() - 1 {
            return text.len() >= pos && text[pos..].ends_with(part);
        } else {
            match text[pos..].find(part) {
                Some(found) => pos += found + part.len(),
                None => return false,
            }
        }
    }
    true
}

/// Whether a directory entry should be pruned (its whole subtree skipped).
fn dir_excluded(path: &Path, excludes: &[String]) -> bool {
    excludes.iter().any(|p| pattern_matches(p, path))
}

/// Walk `roots` and collect supported audio files, applying in order:
/// directory excludes (prune), size floor, extension check, includes,
/// file excludes. Output is deduplicated and path-sorted. Permission
/// errors skip the offending subtree without aborting the walk.
pub fn enumerate(roots: &[PathBuf], opts: &EnumerateOptions) -> Vec<PathBuf> {
    let min_bytes = opts.min_file_size_kb * 1024;
    let mut found: BTreeSet<PathBuf> = BTreeSet::new();

    for root in roots {
        let walker = WalkDir::new(root)
            .max_depth(opts.max_depth)
            .into_iter()
            .filter_entry(|e| {
                !(e.file_type().is_dir()
                    && e.depth() > 0
                    && dir_excluded(e.path(), &opts.exclude_patterns))
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    log::warn!("skipping unreadable entry under {}: {e}", root.display());
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();

            let size = match entry.metadata() {
                Ok(m) => m.len(),
                Err(e) => {
                    log::warn!("cannot stat {}: {e}", path.display());
                    continue;
                }
            };
            if size < min_bytes {
                continue;
            }

            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_lowercase();
            if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
                continue;
            }

            if !opts.include_patterns.is_empty()
                && !opts.include_patterns.iter().any(|p| pattern_matches(p, path))
            {
                continue;
            }

            if opts.exclude_patterns.iter().any(|p| pattern_matches(p, path)) {
                continue;
            }

            found.insert(path.to_path_buf());
        }
    }

    found.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct TempTree {
        root: PathBuf,
    }

    impl TempTree {
        fn new(tag: &str) -> Self {
            let root = std::env::temp_dir().join(format!(
                "crateflow_scan_{}_{}",
                tag,
                std::process::id()
            ));
            fs::remove_dir_all(&root).ok();
            fs::create_dir_all(&root).unwrap();
            Self { root }
        }

        fn file(&self, rel: &str, size: usize) -> PathBuf {
            let path = self.root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, vec![0u8; size]).unwrap();
            path
        }
    }

    impl Drop for TempTree {
        fn drop(&mut self) {
            fs::remove_dir_all(&self.root).ok();
        }
    }

    fn opts_small() -> EnumerateOptions {
        EnumerateOptions {
            min_file_size_kb: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_extension_and_size_filters() {
        let tree = TempTree::new("ext");
        let keep = tree.file("a.mp3", 2048);
        tree.file("b.txt", 2048);
        tree.file("tiny.flac", 100);

        let got = enumerate(&[tree.root.clone()], &opts_small());
        assert_eq!(got, vec![keep]);
    }

    #[test]
    fn test_output_sorted_and_deduplicated() {
        let tree = TempTree::new("sort");
        let b = tree.file("b.mp3", 2048);
        let a = tree.file("a.mp3", 2048);

        // Same root given twice must not duplicate results
        let got = enumerate(&[tree.root.clone(), tree.root.clone()], &opts_small());
        assert_eq!(got, vec![a, b]);
    }

    #[test]
    fn test_directory_exclude_prunes_subtree() {
        let tree = TempTree::new("prune");
        let keep = tree.file("keep/a.mp3", 2048);
        tree.file("backup/b.mp3", 2048);
        tree.file("backup/deep/c.mp3", 2048);

        let mut opts = opts_small();
        opts.exclude_patterns = vec!["*/backup".into()];
        let got = enumerate(&[tree.root.clone()], &opts);
        assert_eq!(got, vec![keep]);
    }

    #[test]
    fn test_include_patterns() {
        let tree = TempTree::new("inc");
        let live = tree.file("live/a.mp3", 2048);
        tree.file("studio/b.mp3", 2048);

        // Plain pattern: substring on full path
        let mut opts = opts_small();
        opts.include_patterns = vec!["live".into()];
        assert_eq!(enumerate(&[tree.root.clone()], &opts), vec![live.clone()]);

        // Wildcard pattern: basename match
        let mut opts = opts_small();
        opts.include_patterns = vec!["a.*".into()];
        assert_eq!(enumerate(&[tree.root.clone()], &opts), vec![live]);
    }

    #[test]
    fn test_file_exclude_patterns() {
        let tree = TempTree::new("exc");
        let keep = tree.file("a.mp3", 2048);
        tree.file("a_demo.mp3", 2048);

        let mut opts = opts_small();
        opts.exclude_patterns = vec!["*demo*".into()];
        assert_eq!(enumerate(&[tree.root.clone()], &opts), vec![keep]);
    }

    #[test]
    fn test_max_depth() {
        let tree = TempTree::new("depth");
        let shallow = tree.file("a.mp3", 2048);
        tree.file("d1/d2/d3/deep.mp3", 2048);

        let mut opts = opts_small();
        opts.max_depth = 2;
        assert_eq!(enumerate(&[tree.root.clone()], &opts), vec![shallow]);
    }

    #[test]
    fn test_missing_root_is_not_fatal() {
        let got = enumerate(&[PathBuf::from("/no/such/dir")], &opts_small());
        assert!(got.is_empty());
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*.mp3", "song.mp3"));
        assert!(wildcard_match("a*", "abc"));
        assert!(wildcard_match("*demo*", "xx_demo_yy"));
        assert!(wildcard_match("a*c", "abc"));
        assert!(!wildcard_match("a*c", "abd"));
        assert!(!wildcard_match("*.mp3", "song.flac"));
        assert!(wildcard_match("exact", "exact"));
        assert!(!wildcard_match("exact", "exactly"));
    }
}
