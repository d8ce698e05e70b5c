use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use thiserror::Error;

use crate::naming::truncate_stem;

mod relocate;
pub use relocate::relocate;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 1000;

/// NAME_MAX on common filesystems.
pub const DEFAULT_MAX_NAME_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("no free name for '{candidate}' after {attempts} attempts")]
    Exhausted { candidate: String, attempts: u32 },
    #[error("failed to probe '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementResult {
    pub final_path: PathBuf,
    pub was_renamed: bool,
    pub collision_count: u32,
}

#[derive(Debug)]
pub struct PlacementResolver {
    reserved: Mutex<HashSet<PathBuf>>,
    max_attempts: u32,
    max_name_len: usize,
}

impl Default for PlacementResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl PlacementResolver {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            reserved: Default::default(),
            max_attempts,
            max_name_len: DEFAULT_MAX_NAME_LEN,
        }
    }

    pub fn with_max_name_len(mut self, max_name_len: usize) -> Self {
        self.max_name_len = max_name_len;
        self
    }

    /// The candidate itself is tried first, then `stem (1).ext`, `stem (2).ext`, ... up to
    /// `max_attempts` suffixes. A name is free only if nothing exists at that path (dangling
    /// symlinks included) and no earlier call reserved it.
    pub fn resolve(
        &self,
        candidate: &str,
        destination_dir: &Path,
    ) -> Result<PlacementResult, PlacementError> {
        let (stem, extension) = split_candidate(candidate);
        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);

        for collision_count in 0..=self.max_attempts {
            let name = match collision_count {
                0 => candidate.to_string(),
                n => {
                    let suffix = match extension {
                        Some(ext) => format!(" ({}).{}", n, ext),
                        None => format!(" ({})", n),
                    };
                    let room = self.max_name_len.saturating_sub(suffix.len()).max(1);
                    format!("{}{}", truncate_stem(stem, room), suffix)
                }
            };
            let path = destination_dir.join(&name);
            if reserved.contains(&path) {
                tracing::trace!("{} is reserved by this run", path.display());
                continue;
            }
            if path_taken(&path)? {
                tracing::trace!("{} already exists", path.display());
                continue;
            }

            reserved.insert(path.clone());
            return Ok(PlacementResult {
                final_path: path,
                was_renamed: collision_count > 0,
                collision_count,
            });
        }

        Err(PlacementError::Exhausted {
            candidate: candidate.to_string(),
            attempts: self.max_attempts,
        })
    }

    pub fn reserved_count(&self) -> usize {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn split_candidate(candidate: &str) -> (&str, Option<&str>) {
    match candidate.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (candidate, None),
    }
}

fn path_taken(path: &Path) -> Result<bool, PlacementError> {
    match std::fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(PlacementError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn free_candidate_is_used_as_is() {
        let dir = tempdir().unwrap();
        let resolver = PlacementResolver::default();
        let result = resolver.resolve("A - B.flac", dir.path()).unwrap();
        assert_eq!(result.final_path, dir.path().join("A - B.flac"));
        assert!(!result.was_renamed);
        assert_eq!(result.collision_count, 0);
    }

    #[test]
    fn existing_files_get_counter_suffix() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("A - B.flac"), b"x").unwrap();
        fs::write(dir.path().join("A - B (1).flac"), b"x").unwrap();

        let result = PlacementResolver::default()
            .resolve("A - B.flac", dir.path())
            .unwrap();
        assert_eq!(result.final_path, dir.path().join("A - B (2).flac"));
        assert!(result.was_renamed);
        assert_eq!(result.collision_count, 2);
        assert!(!result.final_path.exists());
    }

    #[test]
    fn repeated_candidates_in_one_run_strictly_increase() {
        let dir = tempdir().unwrap();
        let resolver = PlacementResolver::default();
        let counts: Vec<u32> = (0..4)
            .map(|_| resolver.resolve("A - B.flac", dir.path()).unwrap())
            .map(|result| {
                assert!(!result.final_path.exists());
                result.collision_count
            })
            .collect();
        assert_eq!(counts, vec![0, 1, 2, 3]);
        assert_eq!(resolver.reserved_count(), 4);
    }

    #[test]
    fn names_without_extension_are_suffixed_at_the_end() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("README"), b"x").unwrap();
        let result = PlacementResolver::default()
            .resolve("README", dir.path())
            .unwrap();
        assert_eq!(result.final_path, dir.path().join("README (1)"));
    }

    #[test]
    fn exhausted_after_max_attempts() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("x.mp3"), b"x").unwrap();
        fs::write(dir.path().join("x (1).mp3"), b"x").unwrap();
        fs::write(dir.path().join("x (2).mp3"), b"x").unwrap();

        let resolver = PlacementResolver::new(2);
        match resolver.resolve("x.mp3", dir.path()) {
            Err(PlacementError::Exhausted {
                candidate,
                attempts,
            }) => {
                assert_eq!(candidate, "x.mp3");
                assert_eq!(attempts, 2);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[test]
    fn suffixed_names_stay_within_the_length_limit() {
        let dir = tempdir().unwrap();
        let candidate = format!("{}.flac", "a".repeat(45));
        fs::write(dir.path().join(&candidate), b"x").unwrap();

        let resolver = PlacementResolver::default().with_max_name_len(50);
        let result = resolver.resolve(&candidate, dir.path()).unwrap();
        let name = result.final_path.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(result.collision_count, 1);
        assert_eq!(name, format!("{} (1).flac", "a".repeat(41)));
        assert_eq!(name.len(), 50);

        let short = resolver.resolve("x.flac", dir.path()).unwrap();
        assert_eq!(short.final_path, dir.path().join("x.flac"));
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_counts_as_taken() {
        let dir = tempdir().unwrap();
        std::os::unix::fs::symlink(dir.path().join("nowhere"), dir.path().join("a.flac")).unwrap();
        let result = PlacementResolver::default()
            .resolve("a.flac", dir.path())
            .unwrap();
        assert_eq!(result.collision_count, 1);
    }
}
