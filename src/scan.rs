use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    time::Instant,
};

use crate::{metadata::normalize_extension, playlist::normalize};

#[derive(Debug, Clone, Default)]
pub struct ScanParams {
    pub include: Vec<PathBuf>,
    pub exclude: Vec<PathBuf>,
    /// Accepted extensions. Empty accepts every file.
    pub extensions: Vec<String>,
    pub include_hidden: bool,
}

impl ScanParams {
    pub fn include(&mut self, path: impl Into<PathBuf>) {
        self.include.push(path.into());
    }

    pub fn exclude(&mut self, path: impl Into<PathBuf>) {
        self.exclude.push(path.into());
    }

    pub fn with_include(self, path: impl Into<PathBuf>) -> Self {
        let mut this = self;
        this.include.push(path.into());
        this
    }

    pub fn with_exclude(self, path: impl Into<PathBuf>) -> Self {
        let mut this = self;
        this.exclude.push(path.into());
        this
    }

    pub fn with_extensions<I, S>(self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut this = self;
        this.extensions
            .extend(extensions.into_iter().map(|ext| normalize_extension(ext.as_ref())));
        this
    }

    pub fn should_exclude(&self, path: &Path) -> bool {
        let path = canonical_or_lexical(path);
        self.exclude
            .iter()
            .any(|exclude| path.starts_with(canonical_or_lexical(exclude)))
    }

    pub fn accepts_extension(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.extensions.iter().any(|accepted| *accepted == ext)
    }

    fn is_hidden(&self, path: &Path) -> bool {
        !self.include_hidden
            && path
                .file_name()
                .map_or(false, |name| name.to_string_lossy().starts_with('.'))
    }
}

fn canonical_or_lexical(path: &Path) -> PathBuf {
    match path.canonicalize() {
        Ok(path) => path,
        Err(_) => match std::env::current_dir() {
            Ok(cwd) if path.is_relative() => normalize(&cwd.join(path)),
            _ => normalize(path),
        },
    }
}

pub async fn scan(dir: impl Into<PathBuf>) -> std::io::Result<Vec<PathBuf>> {
    scan_with(ScanParams::default().with_include(dir)).await
}

/// Missing include paths and symlinks are skipped with a warning.
pub async fn scan_with(params: ScanParams) -> std::io::Result<Vec<PathBuf>> {
    tracing::debug!("scanning with params: {:?}", params);

    let start_time = Instant::now();
    let mut pending = VecDeque::new();
    for path in params.include.iter() {
        tracing::trace!("canonicalizing path: {}", path.display());
        match tokio::fs::canonicalize(path).await {
            Ok(path) => pending.push_back(path),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("skipping missing source '{}'", path.display());
            }
            Err(err) => return Err(err),
        }
    }

    let mut files = Vec::new();
    let mut scanned = 0;
    while let Some(path) = pending.pop_front() {
        if params.should_exclude(&path) {
            tracing::trace!("excluded path: {}", path.display());
            continue;
        }

        let metadata = match tokio::fs::symlink_metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) => {
                tracing::warn!("failed to stat '{}': {}", path.display(), err);
                continue;
            }
        };

        if metadata.file_type().is_symlink() {
            tracing::warn!("skipping symlinked path '{}'", path.display());
        } else if metadata.is_file() {
            scanned += 1;
            if params.accepts_extension(&path) {
                files.push(path);
            } else {
                tracing::trace!(
                    "skipping file '{}' because it has an unknown extension",
                    path.display()
                );
            }
        } else if metadata.is_dir() {
            tracing::trace!("scanning path: {}", path.display());
            let mut readdir = match tokio::fs::read_dir(&path).await {
                Ok(readdir) => readdir,
                Err(err) => {
                    tracing::warn!("failed to read directory '{}': {}", path.display(), err);
                    continue;
                }
            };
            loop {
                let entry = match readdir.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!("failed to list entry in '{}': {}", path.display(), err);
                        break;
                    }
                };
                let entry_path = entry.path();
                if params.is_hidden(&entry_path) {
                    tracing::trace!("skipping hidden path '{}'", entry_path.display());
                    continue;
                }
                pending.push_back(entry_path);
            }
        }
    }

    files.sort();
    files.dedup();

    tracing::debug!(
        "scanned {} files in {:?} and found {} candidates",
        scanned,
        start_time.elapsed(),
        files.len()
    );

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_scan_params() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("foo")).unwrap();
        fs::create_dir_all(root.join("bar")).unwrap();
        fs::create_dir_all(root.join("zoo")).unwrap();

        let mut params = ScanParams::default();
        params.include(root.join("foo/m1.mp3"));
        params.exclude(root.join("foo/m2.mp3"));
        params.include(root.join("bar"));
        params.exclude(root.join("zoo"));

        assert!(!params.should_exclude(&root.join("foo/m1.mp3")));
        assert!(params.should_exclude(&root.join("foo/m2.mp3")));
        assert!(!params.should_exclude(&root.join("bar/m3.mp3")));
        assert!(params.should_exclude(&root.join("zoo/m4.mp3")));
        assert!(params.should_exclude(&root.join("zoo/../zoo/m5.mp3")));
    }

    #[test]
    fn extensions_are_case_insensitive() {
        let params = ScanParams::default().with_extensions([".FLAC", "mp3"]);
        assert!(params.accepts_extension(Path::new("a.flac")));
        assert!(params.accepts_extension(Path::new("a.MP3")));
        assert!(!params.accepts_extension(Path::new("cover.jpg")));
        assert!(!params.accepts_extension(Path::new("README")));
    }

    #[tokio::test]
    async fn scan_is_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b/nested")).unwrap();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::create_dir_all(root.join(".hidden")).unwrap();
        fs::create_dir_all(root.join("skip")).unwrap();
        fs::write(root.join("b/nested/z.flac"), b"x").unwrap();
        fs::write(root.join("a/y.MP3"), b"x").unwrap();
        fs::write(root.join("a/cover.jpg"), b"x").unwrap();
        fs::write(root.join(".hidden/h.flac"), b"x").unwrap();
        fs::write(root.join("a/.partial.flac"), b"x").unwrap();
        fs::write(root.join("skip/s.flac"), b"x").unwrap();

        let params = ScanParams::default()
            .with_include(root)
            .with_include(root.join("a"))
            .with_include(root.join("missing"))
            .with_exclude(root.join("skip"))
            .with_extensions(["flac", "mp3"]);
        let files = scan_with(params).await.unwrap();

        let root = root.canonicalize().unwrap();
        assert_eq!(
            files,
            vec![root.join("a/y.MP3"), root.join("b/nested/z.flac")]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_directory_does_not_stop_the_scan() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("locked")).unwrap();
        fs::write(root.join("locked/l.flac"), b"x").unwrap();
        fs::write(root.join("open.flac"), b"x").unwrap();
        fs::set_permissions(root.join("locked"), fs::Permissions::from_mode(0o000)).unwrap();

        let files = scan(root).await;
        fs::set_permissions(root.join("locked"), fs::Permissions::from_mode(0o755)).unwrap();

        let files = files.unwrap();
        assert!(files.contains(&root.canonicalize().unwrap().join("open.flac")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn scan_skips_symlinks() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("real.flac"), b"x").unwrap();
        std::os::unix::fs::symlink(root.join("real.flac"), root.join("link.flac")).unwrap();

        let files = scan(root).await.unwrap();
        assert_eq!(files, vec![root.canonicalize().unwrap().join("real.flac")]);
    }
}
