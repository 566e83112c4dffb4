//! Local music library used as the offline fallback.
//!
//! When the extractor cannot produce a stream URL, the broadcast stays alive
//! by serving a random track from a local directory. Files are addressed by
//! bare file name; [`MusicLibrary::resolve`] refuses anything that would
//! escape the library root.

use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;

/// Audio file extensions the library recognizes.
const AUDIO_EXTENSIONS: [&str; 5] = ["mp3", "m4a", "ogg", "flac", "wav"];

/// A directory of local audio files.
pub struct MusicLibrary {
    root: PathBuf,
}

impl MusicLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the library root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists the file names of all audio files in the library.
    ///
    /// Non-audio files and subdirectories are ignored. An unreadable root
    /// yields an empty list (the library is optional).
    #[must_use]
    pub fn tracks(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };

        let mut tracks: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| {
                Path::new(name)
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            })
            .collect();
        tracks.sort();
        tracks
    }

    /// Picks a random track file name, or `None` if the library is empty.
    #[must_use]
    pub fn random_track(&self) -> Option<String> {
        let tracks = self.tracks();
        tracks.choose(&mut rand::thread_rng()).cloned()
    }

    /// Resolves a file name to an absolute path inside the library.
    ///
    /// Returns `None` when the file does not exist or the resolved path lies
    /// outside the library root (path traversal).
    #[must_use]
    pub fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        let root = self.root.canonicalize().ok()?;
        let candidate = root.join(file_name).canonicalize().ok()?;
        if candidate.starts_with(&root) && candidate.is_file() {
            Some(candidate)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn library_with(files: &[&str]) -> (TempDir, MusicLibrary) {
        let dir = TempDir::new().unwrap();
        for name in files {
            std::fs::write(dir.path().join(name), b"audio").unwrap();
        }
        let library = MusicLibrary::new(dir.path());
        (dir, library)
    }

    #[test]
    fn tracks_filters_non_audio_files() {
        let (_dir, library) = library_with(&["a.mp3", "b.flac", "notes.txt", "c.OGG"]);
        let tracks = library.tracks();
        assert_eq!(tracks, vec!["a.mp3", "b.flac", "c.OGG"]);
    }

    #[test]
    fn random_track_returns_none_for_empty_library() {
        let (_dir, library) = library_with(&[]);
        assert!(library.random_track().is_none());
    }

    #[test]
    fn resolve_rejects_path_traversal() {
        let (dir, library) = library_with(&["a.mp3"]);
        // Plant a file outside the library root
        let outside = dir.path().parent().unwrap().join("secret.mp3");
        let _ = std::fs::write(&outside, b"x");

        assert!(library.resolve("a.mp3").is_some());
        assert!(library.resolve("../secret.mp3").is_none());
        assert!(library.resolve("missing.mp3").is_none());
    }
}
