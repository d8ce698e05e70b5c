use thiserror::Error;

use crate::metadata::TrackMetadata;

pub const DEFAULT_TEMPLATE: &str = "{artist} - {title}";

/// Maximum length in bytes of a generated filename, extension included.
pub const DEFAULT_MAX_LEN: usize = 200;

const RESERVED: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("naming template is empty")]
    Empty,
    #[error("unknown field '{{{0}}}' in naming template")]
    UnknownField(String),
    #[error("unclosed '{{' at byte {0} of naming template")]
    Unclosed(usize),
    #[error("unmatched '}}' at byte {0} of naming template")]
    Unmatched(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Artist,
    Title,
    Album,
    Genre,
    Year,
    Tempo,
    Track,
}

impl Field {
    fn from_name(name: &str) -> Option<Self> {
        let field = match name.trim().to_ascii_lowercase().as_str() {
            "artist" => Self::Artist,
            "title" => Self::Title,
            "album" => Self::Album,
            "genre" => Self::Genre,
            "year" => Self::Year,
            "tempo" | "bpm" => Self::Tempo,
            "track" | "tracknumber" => Self::Track,
            _ => return None,
        };
        Some(field)
    }

    pub fn placeholder(self) -> &'static str {
        match self {
            Self::Artist => "Unknown Artist",
            Self::Title => "Unknown Title",
            Self::Album => "Unknown Album",
            Self::Genre => "Unknown Genre",
            Self::Year => "Unknown Year",
            Self::Tempo => "Unknown Tempo",
            Self::Track => "00",
        }
    }

    fn value(self, metadata: &TrackMetadata) -> Option<String> {
        match self {
            Self::Artist => metadata.artist.clone(),
            Self::Title => metadata.title.clone(),
            Self::Album => metadata.album.clone(),
            Self::Genre => metadata.genre.clone(),
            Self::Year => metadata.year.map(|year| year.to_string()),
            Self::Tempo => metadata.tempo.map(|tempo| tempo.to_string()),
            Self::Track => metadata.track_number.map(|n| format!("{:02}", n)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Field),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingTemplate {
    source: String,
    segments: Vec<Segment>,
    max_len: usize,
}

impl NamingTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        if template.trim().is_empty() {
            return Err(TemplateError::Empty);
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.char_indices().peekable();
        while let Some((idx, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(TemplateError::Unclosed(idx));
                    }
                    let field =
                        Field::from_name(&name).ok_or(TemplateError::UnknownField(name))?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field));
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(TemplateError::Unmatched(idx)),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
            max_len: DEFAULT_MAX_LEN,
        })
    }

    /// Caps the generated filename length. Values below 16 bytes are raised to 16.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len.max(16);
        self
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Field(field) => Some(*field),
            Segment::Literal(_) => None,
        })
    }

    pub fn render(&self, metadata: &TrackMetadata) -> String {
        let mut rendered = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Field(field) => {
                    let value = field
                        .value(metadata)
                        .map(|v| sanitize(&v))
                        .filter(|v| !v.is_empty());
                    rendered.push_str(value.as_deref().unwrap_or(field.placeholder()));
                }
            }
        }
        sanitize(&rendered)
    }

    /// Rendered stem plus the lower-cased `extension`, truncated without touching the extension.
    pub fn name(&self, metadata: &TrackMetadata, extension: Option<&str>) -> String {
        let stem = self.render(metadata);
        let extension = extension
            .map(|ext| sanitize(ext.trim_start_matches('.')).to_ascii_lowercase())
            .filter(|ext| !ext.is_empty());

        match extension {
            Some(ext) => {
                let room = self.max_len.saturating_sub(ext.len() + 1).max(1);
                format!("{}.{}", truncate_stem(&stem, room), ext)
            }
            None => truncate_stem(&stem, self.max_len),
        }
    }
}

impl Default for NamingTemplate {
    fn default() -> Self {
        Self::parse(DEFAULT_TEMPLATE).expect("default template is valid")
    }
}

impl std::fmt::Display for NamingTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// Makes `name` safe to use as a single path component. An empty result becomes `Unknown`.
pub fn sanitize(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    let mut pending_space = false;
    for c in name.chars() {
        let c = match c {
            '/' | '\\' => '-',
            c if RESERVED.contains(&c) => continue,
            c if c.is_control() || c.is_whitespace() => {
                pending_space = true;
                continue;
            }
            c => c,
        };
        if pending_space && !cleaned.is_empty() {
            cleaned.push(' ');
        }
        pending_space = false;
        cleaned.push(c);
    }

    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c == ' ');
    if trimmed.is_empty() {
        return "Unknown".to_string();
    }
    if is_reserved_device_name(trimmed) {
        return format!("{}_", trimmed);
    }
    trimmed.to_string()
}

fn is_reserved_device_name(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    matches!(upper.as_str(), "CON" | "PRN" | "AUX" | "NUL")
        || ((upper.starts_with("COM") || upper.starts_with("LPT"))
            && upper.len() == 4
            && upper.as_bytes()[3].is_ascii_digit())
}

pub(crate) fn truncate_stem(stem: &str, max_bytes: usize) -> String {
    if stem.len() <= max_bytes {
        return stem.to_string();
    }
    let mut end = max_bytes;
    while !stem.is_char_boundary(end) {
        end -= 1;
    }
    let truncated = stem[..end].trim_end_matches(|c: char| c == '.' || c == ' ');
    if truncated.is_empty() {
        "Unknown".to_string()
    } else {
        truncated.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(artist: Option<&str>, title: Option<&str>) -> TrackMetadata {
        TrackMetadata {
            artist: artist.map(str::to_string),
            title: title.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn parse_rejects_malformed_templates() {
        assert_eq!(NamingTemplate::parse(""), Err(TemplateError::Empty));
        assert_eq!(NamingTemplate::parse("   "), Err(TemplateError::Empty));
        assert_eq!(
            NamingTemplate::parse("{artist"),
            Err(TemplateError::Unclosed(0))
        );
        assert_eq!(
            NamingTemplate::parse("{artist} }"),
            Err(TemplateError::Unmatched(9))
        );
        assert_eq!(
            NamingTemplate::parse("{composer} - {title}"),
            Err(TemplateError::UnknownField("composer".to_string()))
        );
    }

    #[test]
    fn parse_accepts_escaped_braces_and_aliases() {
        let template = NamingTemplate::parse("{{{track}}} {BPM}").unwrap();
        let fields: Vec<Field> = template.fields().collect();
        assert_eq!(fields, vec![Field::Track, Field::Tempo]);

        let md = TrackMetadata {
            track_number: Some(4),
            tempo: Some(120),
            ..Default::default()
        };
        assert_eq!(template.render(&md), "{04} 120");
    }

    #[test]
    fn name_uses_placeholders_for_absent_fields() {
        let template = NamingTemplate::default();
        assert_eq!(
            template.name(&metadata(Some("A"), Some("B")), Some("flac")),
            "A - B.flac"
        );
        assert_eq!(
            template.name(&metadata(None, Some("B")), Some("MP3")),
            "Unknown Artist - B.mp3"
        );
        assert_eq!(
            template.name(&TrackMetadata::default(), Some("flac")),
            "Unknown Artist - Unknown Title.flac"
        );

        let album = NamingTemplate::parse("{year} - {album}").unwrap();
        assert_eq!(
            album.name(&TrackMetadata::default(), None),
            "Unknown Year - Unknown Album"
        );
    }

    #[test]
    fn name_strips_separators_and_reserved_characters() {
        let template = NamingTemplate::default();
        let md = metadata(Some("AC/DC"), Some("What?  Is\tThis: \"it\"\n"));
        assert_eq!(template.name(&md, Some("mp3")), "AC-DC - What Is This it.mp3");

        let dots = metadata(Some(".."), Some("..."));
        let name = template.name(&dots, Some("flac"));
        assert_eq!(name, "Unknown - Unknown.flac");
        assert!(!name.contains('/'));
    }

    #[test]
    fn template_literal_separators_cannot_create_directories() {
        let template = NamingTemplate::parse("{artist}/{album}/{title}").unwrap();
        let md = TrackMetadata {
            artist: Some("A".into()),
            album: Some("C".into()),
            title: Some("B".into()),
            ..Default::default()
        };
        assert_eq!(template.name(&md, Some("flac")), "A-C-B.flac");
    }

    #[test]
    fn name_truncates_but_keeps_extension() {
        let template = NamingTemplate::parse("{title}").unwrap().with_max_len(20);
        let md = metadata(None, Some("ééééééééééééééééééééééé"));
        let name = template.name(&md, Some("flac"));
        assert!(name.len() <= 20, "{} is too long", name);
        assert!(name.ends_with(".flac"));
        assert!(name.starts_with('é'));
    }

    #[test]
    fn sanitize_never_returns_empty_or_device_names() {
        assert_eq!(sanitize(""), "Unknown");
        assert_eq!(sanitize("\u{7}\u{0}"), "Unknown");
        assert_eq!(sanitize("con"), "con_");
        assert_eq!(sanitize("COM1"), "COM1_");
        assert_eq!(sanitize("Concord"), "Concord");
    }
}
