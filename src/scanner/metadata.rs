use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use std::path::Path;

/// Tags pulled from an audio container.
#[derive(Debug, Default, Clone)]
pub struct TagInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<String>,
    pub duration_secs: Option<f64>,
}

/// Read tags from an audio file. Returns empty tags on failure so a
/// missing or unreadable container never aborts analysis.
pub fn read_tags(path: &Path) -> TagInfo {
    let tagged_file = match lofty::read_from_path(path) {
        Ok(f) => f,
        Err(e) => {
            log::debug!("Could not read tags from {}: {e}", path.display());
            return TagInfo::default();
        }
    };

    let duration_secs = {
        let secs = tagged_file.properties().duration().as_secs_f64();
        (secs > 0.0).then_some(secs)
    };

    let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());
    let tag = match tag {
        Some(t) => t,
        None => {
            return TagInfo {
                duration_secs,
                ..TagInfo::default()
            }
        }
    };

    TagInfo {
        title: tag.title().map(|s| s.to_string()),
        artist: tag.artist().map(|s| s.to_string()),
        album: tag.album().map(|s| s.to_string()),
        genre: tag.genre().map(|s| s.to_string()),
        year: tag.year().map(|y| y.to_string()).or_else(|| {
            tag.get_string(&ItemKey::RecordingDate).map(|s| s.to_string())
        }),
        duration_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_file_yields_empty_tags() {
        let tags = read_tags(Path::new("/no/such/file.mp3"));
        assert!(tags.title.is_none());
        assert!(tags.artist.is_none());
        assert!(tags.duration_secs.is_none());
    }
}
