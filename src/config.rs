use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    metadata::normalize_extension,
    naming::{NamingTemplate, DEFAULT_MAX_LEN, DEFAULT_TEMPLATE},
    placement::DEFAULT_MAX_ATTEMPTS,
    playlist::PathStyle,
    smart::{RuleDefinition, SmartPlaylistRule},
};

pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid configuration: {}", problems.join("; "))]
pub struct ConfigError {
    pub problems: Vec<String>,
}

impl ConfigError {
    pub fn new(problem: impl Into<String>) -> Self {
        Self {
            problems: vec![problem.into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub music_root: PathBuf,
    /// Where organized tracks are placed, relative to `music_root` unless absolute.
    pub all_songs_dir: PathBuf,
    /// Where playlists live, relative to `music_root` unless absolute.
    pub playlists_dir: PathBuf,
    pub source_dirs: Vec<PathBuf>,
    pub exclude_dirs: Vec<PathBuf>,
    pub supported_formats: Vec<String>,
    pub smart_playlists: BTreeMap<String, RuleDefinition>,
    pub file_naming: String,
    pub backup_playlists: bool,
    pub playlist_paths: PathStyle,
    pub max_collision_attempts: u32,
    pub max_filename_len: usize,
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        let smart_playlists = [
            ("High Energy.m3u", RuleDefinition::min_tempo(120.0)),
            ("Chill.m3u", RuleDefinition::max_tempo(90.0)),
            (
                "Rock.m3u",
                RuleDefinition::genres(["rock", "alternative", "indie"]),
            ),
            ("Jazz.m3u", RuleDefinition::genres(["jazz", "blues", "swing"])),
            (
                "Classical.m3u",
                RuleDefinition::genres(["classical", "orchestral", "symphony"]),
            ),
            (
                "Electronic.m3u",
                RuleDefinition::genres(["electronic", "edm", "dubstep", "house", "techno"]),
            ),
            ("Hip-Hop.m3u", RuleDefinition::genres(["hip-hop", "rap", "trap"])),
        ]
        .into_iter()
        .map(|(name, rule)| (name.to_string(), rule))
        .collect();

        Self {
            music_root: PathBuf::from("~/Music"),
            all_songs_dir: PathBuf::from("All Songs"),
            playlists_dir: PathBuf::from("."),
            source_dirs: vec![PathBuf::from("~/Downloads"), PathBuf::from("~/Desktop")],
            exclude_dirs: Vec::new(),
            supported_formats: [".flac", ".mp3", ".wav", ".m4a", ".aac"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            smart_playlists,
            file_naming: DEFAULT_TEMPLATE.to_string(),
            backup_playlists: true,
            playlist_paths: PathStyle::Absolute,
            max_collision_attempts: DEFAULT_MAX_ATTEMPTS,
            max_filename_len: DEFAULT_MAX_LEN,
            workers: DEFAULT_WORKERS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledConfig {
    pub template: NamingTemplate,
    pub rules: Vec<SmartPlaylistRule>,
}

impl Config {
    pub fn music_root_path(&self) -> PathBuf {
        expand_home(&self.music_root)
    }

    pub fn all_songs_path(&self) -> PathBuf {
        self.music_root_path().join(expand_home(&self.all_songs_dir))
    }

    pub fn playlists_path(&self) -> PathBuf {
        self.music_root_path().join(expand_home(&self.playlists_dir))
    }

    pub fn playlist_path(&self, name: &str) -> PathBuf {
        self.playlists_path().join(name)
    }

    pub fn source_paths(&self) -> Vec<PathBuf> {
        self.source_dirs.iter().map(|dir| expand_home(dir)).collect()
    }

    pub fn exclude_paths(&self) -> Vec<PathBuf> {
        self.exclude_dirs.iter().map(|dir| expand_home(dir)).collect()
    }

    pub fn normalized_formats(&self) -> Vec<String> {
        let mut formats: Vec<String> = self
            .supported_formats
            .iter()
            .map(|ext| normalize_extension(ext))
            .filter(|ext| !ext.is_empty())
            .collect();
        formats.sort();
        formats.dedup();
        formats
    }

    pub fn naming_template(&self) -> Result<NamingTemplate, ConfigError> {
        NamingTemplate::parse(&self.file_naming)
            .map(|template| template.with_max_len(self.max_filename_len))
            .map_err(|err| ConfigError::new(format!("file_naming: {}", err)))
    }

    pub fn smart_rules(&self) -> Result<Vec<SmartPlaylistRule>, ConfigError> {
        let mut rules = Vec::with_capacity(self.smart_playlists.len());
        let mut problems = Vec::new();
        for (name, definition) in &self.smart_playlists {
            match SmartPlaylistRule::compile(name, definition) {
                Ok(rule) => rules.push(rule),
                Err(err) => problems.push(format!("smart_playlists.{}: {}", name, err)),
            }
        }
        if problems.is_empty() {
            Ok(rules)
        } else {
            Err(ConfigError { problems })
        }
    }

    /// Compiles the template and every rule, collecting all problems into one error.
    pub fn compile(&self) -> Result<CompiledConfig, ConfigError> {
        let mut problems = Vec::new();

        if self.music_root.as_os_str().is_empty() {
            problems.push("music_root is empty".to_string());
        }
        if self.all_songs_dir.as_os_str().is_empty() {
            problems.push("all_songs_dir is empty".to_string());
        }
        if self.normalized_formats().is_empty() {
            problems.push("supported_formats lists no extension".to_string());
        }
        if self.max_collision_attempts == 0 {
            problems.push("max_collision_attempts must be at least 1".to_string());
        }
        if self.workers == 0 {
            problems.push("workers must be at least 1".to_string());
        }

        let template = self
            .naming_template()
            .map_err(|err| problems.extend(err.problems))
            .ok();
        let rules = self
            .smart_rules()
            .map_err(|err| problems.extend(err.problems))
            .ok();

        match (template, rules) {
            (Some(template), Some(rules)) if problems.is_empty() => {
                Ok(CompiledConfig { template, rules })
            }
            _ => Err(ConfigError { problems }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.compile().map(drop)
    }
}

/// Expands a leading `~` against `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}
