use std::{
    collections::HashSet,
    io::{self, Write},
    path::{Component, Path, PathBuf},
    sync::{Mutex, PoisonError},
};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use serde::{Deserialize, Serialize};

pub const EXTENSION: &str = "m3u";

const BOM: char = '\u{feff}';

#[cfg(unix)]
const NEW_PLAYLIST_MODE: u32 = 0o644;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathStyle {
    #[default]
    Absolute,
    Relative,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// `#EXTM3U`, `#EXTINF:...` or any other `#` line, kept verbatim.
    Directive(String),
    Entry(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    base_dir: PathBuf,
    lines: Vec<Line>,
}

impl Playlist {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            lines: Vec::new(),
        }
    }

    pub fn parse(base_dir: impl Into<PathBuf>, contents: &str) -> Self {
        let contents = contents.strip_prefix(BOM).unwrap_or(contents);
        let lines = contents
            .lines()
            .filter_map(|line| {
                let line = line.trim_end_matches('\r');
                if line.trim().is_empty() {
                    None
                } else if line.trim_start().starts_with('#') {
                    Some(Line::Directive(line.to_string()))
                } else {
                    Some(Line::Entry(line.to_string()))
                }
            })
            .collect();
        Self {
            base_dir: base_dir.into(),
            lines,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|line| match line {
            Line::Entry(entry) => Some(entry.as_str()),
            Line::Directive(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, entry: &str) -> bool {
        let key = self.resolve(entry);
        self.entries().any(|existing| self.resolve(existing) == key)
    }

    /// Appends every entry not already present, in order, and returns the ones that were added.
    /// Entries are compared by resolved path.
    pub fn append<I, S>(&mut self, entries: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen: HashSet<PathBuf> = self.entries().map(|e| self.resolve(e)).collect();
        let mut added = Vec::new();
        for entry in entries {
            let entry = entry.into();
            if entry.trim().is_empty() || entry.trim_start().starts_with('#') {
                continue;
            }
            if seen.insert(self.resolve(&entry)) {
                self.lines.push(Line::Entry(entry.clone()));
                added.push(entry);
            }
        }
        added
    }

    /// An empty `old_prefix` prepends `new_prefix`. Returns the number of entries rewritten.
    pub fn rewrite_prefix(&mut self, old_prefix: &str, new_prefix: &str) -> usize {
        let old_prefix = old_prefix.trim();
        let new_prefix = new_prefix.trim().trim_end_matches(['/', '\\']);
        let mut rewritten = 0;

        for line in self.lines.iter_mut() {
            let Line::Entry(entry) = line else {
                continue;
            };
            let replaced = if old_prefix.is_empty() {
                Some(join_entry(new_prefix, entry))
            } else {
                strip_entry_prefix(entry, old_prefix).map(|rest| {
                    if rest.contains('\\') && !new_prefix.contains('\\') {
                        join_entry(new_prefix, &rest.replace('\\', "/"))
                    } else {
                        join_entry(new_prefix, rest)
                    }
                })
            };
            if let Some(replaced) = replaced {
                if replaced != *entry {
                    *entry = replaced;
                    rewritten += 1;
                }
            }
        }

        self.dedup();
        rewritten
    }

    pub fn render(&self) -> String {
        let mut output = String::new();
        for line in &self.lines {
            match line {
                Line::Directive(text) | Line::Entry(text) => output.push_str(text),
            }
            output.push('\n');
        }
        output
    }

    /// Drops repeated entries together with the `#EXTINF` block describing them.
    fn dedup(&mut self) {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(self.lines.len());
        let mut pending: Vec<Line> = Vec::new();
        for line in std::mem::take(&mut self.lines) {
            match line {
                Line::Directive(text) if !pending.is_empty() || is_entry_info(&text) => {
                    pending.push(Line::Directive(text));
                }
                Line::Directive(text) => kept.push(Line::Directive(text)),
                Line::Entry(entry) => {
                    if seen.insert(self.resolve(&entry)) {
                        kept.append(&mut pending);
                        kept.push(Line::Entry(entry));
                    } else {
                        tracing::trace!("dropping duplicate entry {}", entry);
                        pending.clear();
                    }
                }
            }
        }
        kept.append(&mut pending);
        self.lines = kept;
    }

    fn resolve(&self, entry: &str) -> PathBuf {
        normalize(&self.base_dir.join(entry))
    }
}

fn is_entry_info(directive: &str) -> bool {
    directive
        .trim_start()
        .get(..7)
        .map_or(false, |tag| tag.eq_ignore_ascii_case("#EXTINF"))
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// `/` and `\` both count as separators.
fn strip_entry_prefix<'a>(entry: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_end_matches(is_separator);
    if prefix.is_empty() {
        return entry
            .starts_with(is_separator)
            .then(|| entry.trim_start_matches(is_separator));
    }
    let head = entry.get(..prefix.len())?;
    let same = head.chars().count() == prefix.chars().count()
        && head
            .chars()
            .zip(prefix.chars())
            .all(|(a, b)| a == b || (is_separator(a) && is_separator(b)));
    if !same {
        return None;
    }
    let rest = &entry[prefix.len()..];
    if rest.is_empty() {
        Some(rest)
    } else if rest.starts_with(is_separator) {
        Some(rest.trim_start_matches(is_separator))
    } else {
        None
    }
}

fn join_entry(prefix: &str, entry: &str) -> String {
    if prefix.is_empty() {
        entry.to_string()
    } else if entry.is_empty() {
        prefix.to_string()
    } else {
        format!("{}/{}", prefix, entry)
    }
}

pub fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

pub fn entry_for(target: &Path, playlist_dir: &Path, style: PathStyle) -> String {
    match style {
        PathStyle::Absolute => target.to_string_lossy().into_owned(),
        PathStyle::Relative => relative_entry(target, playlist_dir),
    }
}

pub fn relative_entry(target: &Path, base: &Path) -> String {
    let target = normalize(target);
    let base = normalize(base);
    if target.is_absolute() != base.is_absolute() {
        return target.to_string_lossy().into_owned();
    }

    let target_components: Vec<Component> = target.components().collect();
    let base_components: Vec<Component> = base.components().collect();
    let common = target_components
        .iter()
        .zip(base_components.iter())
        .take_while(|(a, b)| a == b)
        .count();
    if target.is_absolute() && common == 0 {
        return target.to_string_lossy().into_owned();
    }

    let mut relative = PathBuf::new();
    for _ in common..base_components.len() {
        relative.push("..");
    }
    for component in &target_components[common..] {
        relative.push(component.as_os_str());
    }
    relative.to_string_lossy().into_owned()
}

/// The previous version is copied to `<name>.bak` once per store when backups are on.
#[derive(Debug, Default)]
pub struct PlaylistStore {
    backup: bool,
    backed_up: Mutex<HashSet<PathBuf>>,
}

impl PlaylistStore {
    pub fn new(backup: bool) -> Self {
        Self {
            backup,
            backed_up: Default::default(),
        }
    }

    pub fn load(&self, path: &Path) -> io::Result<Playlist> {
        let base_dir = parent_dir(path).to_path_buf();
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::trace!("{} does not exist yet", path.display());
                return Ok(Playlist::new(base_dir));
            }
            Err(err) => return Err(err),
        };
        let contents = String::from_utf8(bytes).map_err(|err| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not valid utf-8: {}", path.display(), err),
            )
        })?;
        Ok(Playlist::parse(base_dir, &contents))
    }

    /// Atomically replaces the file at `path` with `playlist`, keeping the file's permissions.
    pub fn save(&self, playlist: &Playlist, path: &Path) -> io::Result<()> {
        let parent = parent_dir(path);
        std::fs::create_dir_all(parent)?;

        if self.backup {
            self.backup_once(path)?;
        }

        let mut tmp = tempfile::Builder::new()
            .prefix(".musicorg-")
            .suffix(".m3u.part")
            .tempfile_in(parent)?;
        tmp.write_all(playlist.render().as_bytes())?;
        match std::fs::metadata(path) {
            Ok(existing) => tmp.as_file().set_permissions(existing.permissions())?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                #[cfg(unix)]
                tmp.as_file()
                    .set_permissions(std::fs::Permissions::from_mode(NEW_PLAYLIST_MODE))?;
            }
            Err(err) => return Err(err),
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|err| err.error)?;

        tracing::debug!(
            "saved {} with {} entries",
            path.display(),
            playlist.len()
        );
        Ok(())
    }

    fn backup_once(&self, path: &Path) -> io::Result<()> {
        let mut backed_up = self.backed_up.lock().unwrap_or_else(PoisonError::into_inner);
        if backed_up.contains(path) {
            return Ok(());
        }
        match std::fs::copy(path, backup_path(path)) {
            Ok(_) => tracing::debug!("backed up {}", path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        backed_up.insert(path.to_path_buf());
        Ok(())
    }
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn parse_keeps_directives_and_drops_blank_lines() {
        let playlist = Playlist::parse(
            "/music",
            "\u{feff}#EXTM3U\r\n#EXTINF:123,A - B\r\nAll Songs/A - B.flac\r\n\r\n  \nC.mp3\n",
        );
        assert_eq!(
            playlist.lines(),
            &[
                Line::Directive("#EXTM3U".to_string()),
                Line::Directive("#EXTINF:123,A - B".to_string()),
                Line::Entry("All Songs/A - B.flac".to_string()),
                Line::Entry("C.mp3".to_string()),
            ]
        );
        assert_eq!(
            playlist.render(),
            "#EXTM3U\n#EXTINF:123,A - B\nAll Songs/A - B.flac\nC.mp3\n"
        );
    }

    #[test]
    fn append_skips_duplicates_and_keeps_order() {
        let mut playlist = Playlist::parse("/music", "one.flac\ntwo.flac\nthree.flac\n");
        let added = playlist.append(["two.flac", "four.flac"]);
        assert_eq!(added, vec!["four.flac".to_string()]);
        assert_eq!(
            playlist.entries().collect::<Vec<_>>(),
            vec!["one.flac", "two.flac", "three.flac", "four.flac"]
        );
    }

    #[test]
    fn append_is_idempotent() {
        let batch = ["a.flac", "sub/../b.flac", "b.flac", "/music/a.flac"];
        let mut once = Playlist::new("/music");
        once.append(batch);
        let mut twice = once.clone();
        let added = twice.append(batch);
        assert!(added.is_empty());
        assert_eq!(once, twice);
        assert_eq!(once.entries().collect::<Vec<_>>(), vec!["a.flac", "sub/../b.flac"]);
        assert!(once.contains("./b.flac"));
    }

    #[test]
    fn rewrite_prefix_replaces_leading_components() {
        let mut playlist = Playlist::parse(
            "/music",
            "#EXTM3U\nX:/old/a.flac\nX:/old/b.flac\nX:/older/c.flac\n",
        );
        assert_eq!(playlist.rewrite_prefix("X:/old", "All Songs"), 2);
        assert_eq!(
            playlist.render(),
            "#EXTM3U\nAll Songs/a.flac\nAll Songs/b.flac\nX:/older/c.flac\n"
        );
    }

    #[test]
    fn rewrite_prefix_with_empty_old_prefix_prepends() {
        let mut playlist = Playlist::parse("/music", "a.flac\nAll Songs/a.flac\nb.flac\n");
        assert_eq!(playlist.rewrite_prefix("", "All Songs/"), 3);
        assert_eq!(
            playlist.entries().collect::<Vec<_>>(),
            vec!["All Songs/a.flac", "All Songs/All Songs/a.flac", "All Songs/b.flac"]
        );
    }

    #[test]
    fn rewrite_prefix_collapses_new_duplicates() {
        let mut playlist = Playlist::parse("/music", "old/a.flac\nnew/a.flac\nold/b.flac\n");
        playlist.rewrite_prefix("old", "new");
        assert_eq!(
            playlist.entries().collect::<Vec<_>>(),
            vec!["new/a.flac", "new/b.flac"]
        );
    }

    #[test]
    fn relative_entries() {
        assert_eq!(
            relative_entry(
                Path::new("/music/All Songs/A - B.flac"),
                Path::new("/music")
            ),
            "All Songs/A - B.flac"
        );
        assert_eq!(
            relative_entry(Path::new("/music/All Songs/x.mp3"), Path::new("/music/lists")),
            "../All Songs/x.mp3"
        );
        assert_eq!(
            entry_for(Path::new("/a/b.flac"), Path::new("/c"), PathStyle::Absolute),
            "/a/b.flac"
        );
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let playlist = PlaylistStore::default()
            .load(&dir.path().join("Rock.m3u"))
            .unwrap();
        assert!(playlist.is_empty());
        assert_eq!(playlist.base_dir(), dir.path());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Mix.m3u");
        let original = "#EXTM3U\n#EXTINF:10,x\n/a/x.flac\nrel/y.mp3\n";
        fs::write(&path, original).unwrap();

        let store = PlaylistStore::default();
        let playlist = store.load(&path).unwrap();
        store.save(&playlist, &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
        assert_eq!(store.load(&path).unwrap(), playlist);
    }

    #[test]
    fn save_backs_up_previous_version_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Mix.m3u");
        fs::write(&path, "first.flac\n").unwrap();

        let store = PlaylistStore::new(true);
        let mut playlist = store.load(&path).unwrap();
        playlist.append(["second.flac"]);
        store.save(&playlist, &path).unwrap();
        playlist.append(["third.flac"]);
        store.save(&playlist, &path).unwrap();

        assert_eq!(
            fs::read_to_string(backup_path(&path)).unwrap(),
            "first.flac\n"
        );
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "first.flac\nsecond.flac\nthird.flac\n"
        );
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn rewrite_prefix_drops_extinf_of_collapsed_entries() {
        let mut playlist = Playlist::parse(
            "/music",
            "#EXTM3U\n#EXTINF:10,Old A\nold/a.flac\n#EXTINF:20,New A\nnew/a.flac\n#EXTINF:30,Song C\nold/c.flac\n",
        );
        assert_eq!(playlist.rewrite_prefix("old", "new"), 2);
        assert_eq!(
            playlist.render(),
            "#EXTM3U\n#EXTINF:10,Old A\nnew/a.flac\n#EXTINF:30,Song C\nnew/c.flac\n"
        );
    }

    #[test]
    fn rewrite_prefix_accepts_backslash_separators() {
        let mut playlist = Playlist::parse(
            "/music",
            "X:\\music\\All Songs\\a.flac\nX:/music/b.flac\nX:\\musical\\c.flac\n",
        );
        assert_eq!(playlist.rewrite_prefix("X:\\music", "/home/me/Music"), 2);
        assert_eq!(
            playlist.entries().collect::<Vec<_>>(),
            vec![
                "/home/me/Music/All Songs/a.flac",
                "/home/me/Music/b.flac",
                "X:\\musical\\c.flac"
            ]
        );
    }

    #[test]
    fn entries_keep_surrounding_spaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Spaces.m3u");
        let original = "song with trailing space.flac \n one leading.mp3\n";
        fs::write(&path, original).unwrap();

        let store = PlaylistStore::default();
        let playlist = store.load(&path).unwrap();
        assert_eq!(
            playlist.entries().collect::<Vec<_>>(),
            vec!["song with trailing space.flac ", " one leading.mp3"]
        );
        store.save(&playlist, &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }

    #[cfg(unix)]
    #[test]
    fn save_keeps_file_permissions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Shared.m3u");
        fs::write(&path, "a.flac\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o664)).unwrap();

        let store = PlaylistStore::default();
        let mut playlist = store.load(&path).unwrap();
        playlist.append(["b.flac"]);
        store.save(&playlist, &path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o664);

        let fresh = dir.path().join("New.m3u");
        store.save(&playlist, &fresh).unwrap();
        let mode = fs::metadata(&fresh).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, NEW_PLAYLIST_MODE);
    }

    #[test]
    fn normalize_is_lexical() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(normalize(Path::new("../a/..")), PathBuf::from(".."));
    }
}
