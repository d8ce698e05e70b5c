use std::{collections::BTreeSet, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metadata::TrackMetadata;

/// A rule definition as written in the configuration file.
///
/// ```json
/// { "min_tempo": 120 }
/// { "genre": ["rock", "indie"] }
/// { "any": [{ "genre": "jazz" }, { "max_tempo": 80, "exclusive_bounds": true }] }
/// ```
///
/// Multiple keys in one definition must all match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuleDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_tempo: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tempo: Option<f64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub exclusive_bounds: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<GenreSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_year: Option<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub all: Vec<RuleDefinition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub any: Vec<RuleDefinition>,
}

impl RuleDefinition {
    pub fn min_tempo(tempo: f64) -> Self {
        Self {
            min_tempo: Some(tempo),
            ..Default::default()
        }
    }

    pub fn max_tempo(tempo: f64) -> Self {
        Self {
            max_tempo: Some(tempo),
            ..Default::default()
        }
    }

    pub fn genres<I, S>(genres: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            genre: Some(GenreSet::Many(genres.into_iter().map(Into::into).collect())),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GenreSet {
    One(String),
    Many(Vec<String>),
}

impl GenreSet {
    fn iter(&self) -> impl Iterator<Item = &str> {
        let slice = match self {
            GenreSet::One(genre) => std::slice::from_ref(genre),
            GenreSet::Many(genres) => genres.as_slice(),
        };
        slice.iter().map(String::as_str)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuleError {
    #[error("playlist name '{0}' is not a plain file name")]
    InvalidName(String),
    #[error("rule has no predicate")]
    NoPredicate,
    #[error("genre list is empty")]
    EmptyGenreSet,
    #[error("tempo bound {0} is not a finite number")]
    NonFiniteTempo(f64),
    #[error("min_tempo {min} is greater than max_tempo {max}")]
    InvertedTempo { min: f64, max: f64 },
    #[error("min_year {min} is greater than max_year {max}")]
    InvertedYear { min: i32, max: i32 },
    #[error("exclusive_bounds is set but no tempo bound is given")]
    DanglingExclusive,
}

/// An absent metadata field makes the predicate false.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Tempo {
        min: Option<f64>,
        max: Option<f64>,
        exclusive: bool,
    },
    Genre(Vec<String>),
    Year {
        min: Option<i32>,
        max: Option<i32>,
    },
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

impl Predicate {
    pub fn compile(definition: &RuleDefinition) -> Result<Self, RuleError> {
        let mut parts = Vec::new();

        if definition.min_tempo.is_some() || definition.max_tempo.is_some() {
            for bound in [definition.min_tempo, definition.max_tempo].into_iter().flatten() {
                if !bound.is_finite() {
                    return Err(RuleError::NonFiniteTempo(bound));
                }
            }
            if let (Some(min), Some(max)) = (definition.min_tempo, definition.max_tempo) {
                if min > max {
                    return Err(RuleError::InvertedTempo { min, max });
                }
            }
            parts.push(Predicate::Tempo {
                min: definition.min_tempo,
                max: definition.max_tempo,
                exclusive: definition.exclusive_bounds,
            });
        } else if definition.exclusive_bounds {
            return Err(RuleError::DanglingExclusive);
        }

        if let Some(genres) = &definition.genre {
            let genres: Vec<String> = genres
                .iter()
                .map(|genre| genre.trim().to_lowercase())
                .filter(|genre| !genre.is_empty())
                .collect();
            if genres.is_empty() {
                return Err(RuleError::EmptyGenreSet);
            }
            parts.push(Predicate::Genre(genres));
        }

        if definition.min_year.is_some() || definition.max_year.is_some() {
            if let (Some(min), Some(max)) = (definition.min_year, definition.max_year) {
                if min > max {
                    return Err(RuleError::InvertedYear { min, max });
                }
            }
            parts.push(Predicate::Year {
                min: definition.min_year,
                max: definition.max_year,
            });
        }

        if !definition.all.is_empty() {
            let all = definition
                .all
                .iter()
                .map(Predicate::compile)
                .collect::<Result<Vec<_>, _>>()?;
            parts.push(Predicate::All(all));
        }

        if !definition.any.is_empty() {
            let any = definition
                .any
                .iter()
                .map(Predicate::compile)
                .collect::<Result<Vec<_>, _>>()?;
            parts.push(Predicate::Any(any));
        }

        match parts.len() {
            0 => Err(RuleError::NoPredicate),
            1 => Ok(parts.remove(0)),
            _ => Ok(Predicate::All(parts)),
        }
    }

    pub fn matches(&self, metadata: &TrackMetadata) -> bool {
        match self {
            Predicate::Tempo {
                min,
                max,
                exclusive,
            } => {
                let Some(tempo) = metadata.tempo.map(f64::from) else {
                    return false;
                };
                let above = min.map_or(true, |min| {
                    if *exclusive {
                        tempo > min
                    } else {
                        tempo >= min
                    }
                });
                let below = max.map_or(true, |max| {
                    if *exclusive {
                        tempo < max
                    } else {
                        tempo <= max
                    }
                });
                above && below
            }
            Predicate::Genre(genres) => {
                let Some(genre) = metadata.genre.as_deref() else {
                    return false;
                };
                let genre = genre.to_lowercase();
                genres.iter().any(|wanted| genre.contains(wanted.as_str()))
            }
            Predicate::Year { min, max } => {
                let Some(year) = metadata.year else {
                    return false;
                };
                min.map_or(true, |min| year >= min) && max.map_or(true, |max| year <= max)
            }
            Predicate::All(predicates) => predicates.iter().all(|p| p.matches(metadata)),
            Predicate::Any(predicates) => predicates.iter().any(|p| p.matches(metadata)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmartPlaylistRule {
    pub playlist_name: String,
    pub predicate: Predicate,
}

impl SmartPlaylistRule {
    pub fn compile(playlist_name: &str, definition: &RuleDefinition) -> Result<Self, RuleError> {
        if !is_plain_file_name(playlist_name) {
            return Err(RuleError::InvalidName(playlist_name.to_string()));
        }
        Ok(Self {
            playlist_name: playlist_name.to_string(),
            predicate: Predicate::compile(definition)?,
        })
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && trimmed == name
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.chars().any(char::is_control)
}

#[derive(Debug, Clone, Copy)]
pub struct SmartPlaylistMatcher<'a> {
    rules: &'a [SmartPlaylistRule],
}

impl<'a> SmartPlaylistMatcher<'a> {
    pub fn new(rules: &'a [SmartPlaylistRule]) -> Self {
        Self { rules }
    }

    pub fn matches(&self, metadata: &TrackMetadata) -> BTreeSet<&'a str> {
        self.rules
            .iter()
            .filter(|rule| rule.predicate.matches(metadata))
            .map(|rule| rule.playlist_name.as_str())
            .collect()
    }
}

/// Names outside of `available` are ignored by the engine. Called off the async executor.
pub trait PlaylistSelector: Send + Sync + 'static {
    fn select(&self, metadata: &TrackMetadata, available: &[String]) -> BTreeSet<String>;
}

#[derive(Debug, Clone)]
pub struct SmartSelector {
    rules: Arc<[SmartPlaylistRule]>,
}

impl SmartSelector {
    pub fn new(rules: impl Into<Arc<[SmartPlaylistRule]>>) -> Self {
        Self {
            rules: rules.into(),
        }
    }

    pub fn rules(&self) -> &[SmartPlaylistRule] {
        &self.rules
    }
}

impl PlaylistSelector for SmartSelector {
    fn select(&self, metadata: &TrackMetadata, _available: &[String]) -> BTreeSet<String> {
        SmartPlaylistMatcher::new(&self.rules)
            .matches(metadata)
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}
