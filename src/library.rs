use std::{
    collections::BTreeSet,
    io,
    path::{Path, PathBuf},
};

use crate::{
    config::Config,
    playlist::{self, Playlist, PlaylistStore},
    scan::{self, ScanParams},
};

pub const EXPORT_FILE_NAME: &str = "music_playlist.m3u";

pub(crate) async fn blocking<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
}

/// The `*.m3u` files in `playlists_dir` plus the `configured` playlists, sorted.
pub fn available_playlists(playlists_dir: &Path, configured: &[String]) -> io::Result<Vec<String>> {
    let mut names: BTreeSet<String> = configured.iter().cloned().collect();
    let entries = match std::fs::read_dir(playlists_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(names.into_iter().collect());
        }
        Err(err) => return Err(err),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !is_playlist_file(&path) || !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
            names.insert(name.to_string());
        }
    }
    Ok(names.into_iter().collect())
}

fn is_playlist_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case(playlist::EXTENSION))
}

fn playlist_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if is_playlist_file(&path) && entry.file_type()?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub async fn create_smart_playlists(config: &Config) -> io::Result<Vec<PathBuf>> {
    let playlists_dir = config.playlists_path();
    let paths: Vec<PathBuf> = config
        .smart_playlists
        .keys()
        .map(|name| playlists_dir.join(name))
        .collect();

    blocking(move || {
        std::fs::create_dir_all(&playlists_dir)?;
        let mut created = Vec::new();
        for path in paths {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => {
                    tracing::info!("created {}", path.display());
                    created.push(path);
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    tracing::debug!("{} already exists", path.display());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(created)
    })
    .await
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixRewrite {
    pub playlist: PathBuf,
    pub rewritten: usize,
}

pub async fn rewrite_prefix_all(
    dir: &Path,
    old_prefix: &str,
    new_prefix: &str,
    backup: bool,
) -> io::Result<Vec<PrefixRewrite>> {
    let dir = dir.to_path_buf();
    let old_prefix = old_prefix.to_string();
    let new_prefix = new_prefix.to_string();

    blocking(move || {
        let store = PlaylistStore::new(backup);
        let mut rewrites = Vec::new();
        for path in playlist_files(&dir)? {
            let mut playlist = store.load(&path)?;
            let before = playlist.clone();
            let rewritten = playlist.rewrite_prefix(&old_prefix, &new_prefix);
            if playlist != before {
                store.save(&playlist, &path)?;
                tracing::info!("updated {} ({} entries)", path.display(), rewritten);
            }
            rewrites.push(PrefixRewrite {
                playlist: path,
                rewritten,
            });
        }
        Ok(rewrites)
    })
    .await
}

/// Writes `dir/music_playlist.m3u` (or `output`) with paths relative to the playlist.
pub async fn export_directory(
    dir: &Path,
    output: Option<&Path>,
    extensions: &[String],
    backup: bool,
) -> io::Result<(PathBuf, usize)> {
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| dir.join(EXPORT_FILE_NAME));
    let params = ScanParams::default()
        .with_include(dir)
        .with_extensions(extensions);
    let files = scan::scan_with(params).await?;

    blocking(move || {
        let parent = output
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let base_dir = parent.canonicalize()?;

        let mut exported = Playlist::new(&base_dir);
        exported.append(
            files
                .iter()
                .map(|file| playlist::relative_entry(file, &base_dir)),
        );
        PlaylistStore::new(backup).save(&exported, &output)?;
        tracing::info!(
            "exported {} entries to {}",
            exported.len(),
            output.display()
        );
        let count = exported.len();
        Ok((output, count))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn config_for(root: &Path) -> Config {
        Config {
            music_root: root.to_path_buf(),
            playlists_dir: PathBuf::from("Playlists"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_smart_playlists_keeps_existing_files() {
        let dir = tempdir().unwrap();
        let config = config_for(dir.path());
        fs::create_dir_all(config.playlists_path()).unwrap();
        fs::write(config.playlist_path("Rock.m3u"), "/keep/me.flac\n").unwrap();

        let created = create_smart_playlists(&config).await.unwrap();
        assert_eq!(created.len(), 6);
        assert!(!created.contains(&config.playlist_path("Rock.m3u")));
        assert_eq!(
            fs::read_to_string(config.playlist_path("Rock.m3u")).unwrap(),
            "/keep/me.flac\n"
        );
        assert!(create_smart_playlists(&config).await.unwrap().is_empty());
    }

    #[test]
    fn available_playlists_merges_disk_and_config() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Road Trip.m3u"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::create_dir_all(dir.path().join("folder.m3u")).unwrap();

        let names =
            available_playlists(dir.path(), &["Rock.m3u".to_string(), "Road Trip.m3u".to_string()])
                .unwrap();
        assert_eq!(names, vec!["Road Trip.m3u", "Rock.m3u"]);

        let missing = available_playlists(&dir.path().join("nope"), &["A.m3u".to_string()]).unwrap();
        assert_eq!(missing, vec!["A.m3u"]);
    }

    #[tokio::test]
    async fn rewrite_prefix_all_only_saves_changed_playlists() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.m3u"), "x.flac\ny.flac\n").unwrap();
        fs::write(dir.path().join("b.m3u"), "#EXTM3U\n").unwrap();

        let rewrites = rewrite_prefix_all(dir.path(), "", "All Songs", true)
            .await
            .unwrap();
        assert_eq!(
            rewrites,
            vec![
                PrefixRewrite {
                    playlist: dir.path().join("a.m3u"),
                    rewritten: 2
                },
                PrefixRewrite {
                    playlist: dir.path().join("b.m3u"),
                    rewritten: 0
                },
            ]
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("a.m3u")).unwrap(),
            "All Songs/x.flac\nAll Songs/y.flac\n"
        );
        assert!(dir.path().join("a.m3u.bak").exists());
        assert!(!dir.path().join("b.m3u.bak").exists());
    }

    #[tokio::test]
    async fn export_directory_writes_relative_entries() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("All Songs")).unwrap();
        fs::write(dir.path().join("All Songs/A - B.flac"), b"x").unwrap();
        fs::write(dir.path().join("All Songs/C - D.mp3"), b"x").unwrap();
        fs::write(dir.path().join("All Songs/cover.jpg"), b"x").unwrap();

        let (output, count) = export_directory(dir.path(), None, &["flac".to_string()], false)
            .await
            .unwrap();
        assert_eq!(output, dir.path().join(EXPORT_FILE_NAME));
        assert_eq!(count, 1);
        assert_eq!(
            fs::read_to_string(&output).unwrap(),
            "All Songs/A - B.flac\n"
        );
    }
}
