//! Resolution strategies, tried in order until one finds the audio bytes.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::types::Track;

/// File extensions treated as audio when scanning the media root.
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "flac", "ogg", "oga", "opus", "m4a", "aac", "webm", "aif", "aiff",
];

/// Returns true if the path has one of [`AUDIO_EXTENSIONS`].
pub fn has_audio_extension(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|e| AUDIO_EXTENSIONS.contains(&e.as_str()))
}

/// One way of locating a track's source file.
pub trait ResolveStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Returns a regular file holding the track's audio, if this strategy finds one.
    fn resolve(&self, track: &Track, media_root: &Path) -> Option<PathBuf>;
}

/// The stored path, when it still points at a file.
pub struct ExactPath;

impl ResolveStrategy for ExactPath {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn resolve(&self, track: &Track, _media_root: &Path) -> Option<PathBuf> {
        let path = &track.stored_path;
        (!path.as_os_str().is_empty() && path.is_file()).then(|| path.clone())
    }
}

/// A file with the stored path's file name somewhere under the media root.
pub struct BasenameInRoot {
    pub max_depth: usize,
}

impl ResolveStrategy for BasenameInRoot {
    fn name(&self) -> &'static str {
        "basename"
    }

    fn resolve(&self, track: &Track, media_root: &Path) -> Option<PathBuf> {
        let file_name = track.stored_path.file_name()?;

        let direct = media_root.join(file_name);
        if direct.is_file() {
            return Some(direct);
        }

        scan(media_root, self.max_depth).find(|path| path.file_name() == Some(file_name))
    }
}

/// An audio file whose name contains the id suffix or the title.
pub struct FuzzyMatch {
    pub max_depth: usize,
}

impl ResolveStrategy for FuzzyMatch {
    fn name(&self) -> &'static str {
        "fuzzy"
    }

    fn resolve(&self, track: &Track, media_root: &Path) -> Option<PathBuf> {
        let suffix = track.id_suffix();
        let title = track.title.trim().to_lowercase();

        scan(media_root, self.max_depth)
            .filter(|path| has_audio_extension(path))
            .find(|path| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                (!suffix.is_empty() && name.contains(&suffix))
                    || (!title.is_empty() && name.contains(&title))
            })
    }
}

/// Regular files under `root`, in file-name order so matches are deterministic.
fn scan(root: &Path, max_depth: usize) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
}

/// The default strategy order: exact path, base name, fuzzy match.
pub fn default_strategies(max_depth: usize) -> Vec<Box<dyn ResolveStrategy>> {
    vec![
        Box::new(ExactPath),
        Box::new(BasenameInRoot { max_depth }),
        Box::new(FuzzyMatch { max_depth }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn make_track(id: &str, stored: PathBuf, title: &str) -> Track {
        Track::new(
            id.to_string(),
            stored,
            title.to_string(),
            "audio/mpeg".to_string(),
            3,
        )
    }

    #[test]
    fn audio_extension_check() {
        assert!(has_audio_extension(Path::new("a/b/song.MP3")));
        assert!(has_audio_extension(Path::new("x.flac")));
        assert!(!has_audio_extension(Path::new("x.json")));
        assert!(!has_audio_extension(Path::new("noext")));
    }

    #[test]
    fn exact_path_requires_a_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.mp3");
        fs::write(&file, b"abc").unwrap();

        let track = make_track("1", file.clone(), "A");
        assert_eq!(ExactPath.resolve(&track, dir.path()), Some(file));

        let track = make_track("1", dir.path().to_path_buf(), "A");
        assert_eq!(ExactPath.resolve(&track, dir.path()), None);
    }

    #[test]
    fn basename_found_in_nested_dir() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("uploads").join("2024");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("song.mp3"), b"abc").unwrap();

        let track = make_track("1", PathBuf::from("/old/host/uploads/song.mp3"), "Song");
        let found = BasenameInRoot { max_depth: 4 }.resolve(&track, dir.path());
        assert_eq!(found, Some(nested.join("song.mp3")));
    }

    #[test]
    fn basename_respects_depth() {
        let dir = tempdir().unwrap();
        let deep = dir.path().join("a").join("b").join("c");
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("song.mp3"), b"abc").unwrap();

        let track = make_track("1", PathBuf::from("/old/song.mp3"), "Song");
        assert!(BasenameInRoot { max_depth: 2 }.resolve(&track, dir.path()).is_none());
        assert!(BasenameInRoot { max_depth: 4 }.resolve(&track, dir.path()).is_some());
    }

    #[test]
    fn fuzzy_matches_id_suffix() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("renamed-C0FFEE.mp3"), b"abc").unwrap();

        let track = make_track("00000000abc0ffee", PathBuf::from("/gone.mp3"), "Other");
        let found = FuzzyMatch { max_depth: 4 }.resolve(&track, dir.path());
        assert_eq!(found, Some(dir.path().join("renamed-C0FFEE.mp3")));
    }

    #[test]
    fn fuzzy_matches_title_case_insensitively() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("01 - Night Drive.flac"), b"abc").unwrap();
        fs::write(dir.path().join("night drive.json"), b"{}").unwrap();

        let track = make_track("0000000000000001", PathBuf::from("/gone.mp3"), "night DRIVE");
        let found = FuzzyMatch { max_depth: 4 }.resolve(&track, dir.path());
        assert_eq!(found, Some(dir.path().join("01 - Night Drive.flac")));
    }

    #[test]
    fn fuzzy_ignores_empty_title() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("anything.mp3"), b"abc").unwrap();

        let track = make_track("zzzzzzzzzzzzzzzz", PathBuf::from("/gone.mp3"), "   ");
        assert!(FuzzyMatch { max_depth: 4 }.resolve(&track, dir.path()).is_none());
    }
}
