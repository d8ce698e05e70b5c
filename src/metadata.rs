use std::path::Path;

use thiserror::Error;

mod mp3;
mod probe;

const PROBE_EXTENSIONS: &[&str] = &["ogg", "opus", "wav", "m4a", "aac", "aiff", "aif"];

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("unsupported format '{extension}'")]
    UnsupportedFormat { extension: String },
    #[error("corrupt tag: {0}")]
    CorruptTag(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    Flac,
    Mp3,
    Other(String),
}

impl AudioFormat {
    pub fn detect(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        let format = match ext.as_str() {
            "flac" => Self::Flac,
            "mp3" => Self::Mp3,
            _ => Self::Other(ext),
        };
        Some(format)
    }

    pub fn extension(&self) -> &str {
        match self {
            Self::Flac => "flac",
            Self::Mp3 => "mp3",
            Self::Other(ext) => ext,
        }
    }

    pub fn is_readable(&self) -> bool {
        match self {
            Self::Flac | Self::Mp3 => true,
            Self::Other(ext) => PROBE_EXTENSIONS.contains(&ext.as_str()),
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub tempo: Option<u32>,
    pub year: Option<i32>,
    pub track_number: Option<u32>,
}

impl TrackMetadata {
    pub fn fallback(path: &Path) -> Self {
        Self::default().with_fallback_title(path)
    }

    pub fn with_fallback_title(mut self, path: &Path) -> Self {
        if self.title.is_none() {
            self.title = path
                .file_stem()
                .map(|stem| stem.to_string_lossy())
                .and_then(|stem| non_blank(Some(stem.as_ref())));
        }
        self
    }
}

/// Reading tags never modifies the file.
pub trait MetadataReader: Send + Sync + 'static {
    fn read(&self, path: &Path) -> Result<TrackMetadata, ReadError>;
}

#[derive(Debug, Clone)]
pub struct TagReader {
    supported: Vec<String>,
}

impl Default for TagReader {
    fn default() -> Self {
        let mut supported = vec!["flac".to_string(), "mp3".to_string()];
        supported.extend(PROBE_EXTENSIONS.iter().map(|ext| ext.to_string()));
        Self { supported }
    }
}

impl TagReader {
    pub fn new<I, S>(formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            supported: formats
                .into_iter()
                .map(|ext| normalize_extension(ext.as_ref()))
                .filter(|ext| !ext.is_empty())
                .collect(),
        }
    }

    pub fn supports(&self, format: &AudioFormat) -> bool {
        format.is_readable() && self.supported.iter().any(|ext| ext == format.extension())
    }
}

impl MetadataReader for TagReader {
    fn read(&self, path: &Path) -> Result<TrackMetadata, ReadError> {
        let format = AudioFormat::detect(path).ok_or_else(|| ReadError::UnsupportedFormat {
            extension: String::new(),
        })?;
        if !self.supports(&format) {
            return Err(ReadError::UnsupportedFormat {
                extension: format.extension().to_string(),
            });
        }

        tracing::trace!("reading {} tags from {}", format, path.display());
        match format {
            AudioFormat::Mp3 => mp3::read(path),
            AudioFormat::Flac | AudioFormat::Other(_) => probe::read(path),
        }
    }
}

pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Tempo tags are free text ("128", "128.40", " 96 BPM"); anything unparsable is dropped.
pub(crate) fn parse_tempo(value: &str) -> Option<u32> {
    let value = value.trim();
    let numeric = value
        .split_whitespace()
        .next()
        .unwrap_or(value)
        .replace(',', ".");
    let tempo: f64 = numeric.parse().ok()?;
    if !tempo.is_finite() || tempo <= 0.0 || tempo >= u32::MAX as f64 {
        return None;
    }
    Some(tempo.trunc() as u32)
}

/// Accepts "2001", "2001-05-03" or "2001/05" and keeps the leading four digit year.
pub(crate) fn parse_year(value: &str) -> Option<i32> {
    let value = value.trim();
    let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() != 4 {
        return None;
    }
    digits.parse().ok().filter(|year| *year > 0)
}

pub(crate) fn parse_track_number(value: &str) -> Option<u32> {
    let number = value.split('/').next()?.trim();
    number.parse().ok().filter(|n| *n > 0)
}
