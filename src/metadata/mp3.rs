use std::path::Path;

use id3::TagLike;

use super::{non_blank, parse_tempo, parse_year, ReadError, TrackMetadata};

pub(super) fn read(path: &Path) -> Result<TrackMetadata, ReadError> {
    let tag = match id3::Tag::read_from_path(path) {
        Ok(tag) => tag,
        Err(id3::Error {
            kind: id3::ErrorKind::NoTag,
            ..
        }) => {
            tracing::debug!("{} has no id3 tag", path.display());
            return Ok(TrackMetadata::default());
        }
        Err(id3::Error {
            kind: id3::ErrorKind::Io(err),
            ..
        }) => return Err(ReadError::Io(err)),
        Err(err) => {
            tracing::debug!("failed to read id3 tag from '{}': {}", path.display(), err);
            return Err(ReadError::CorruptTag(err.to_string()));
        }
    };

    let year = tag
        .year()
        .filter(|year| *year > 0)
        .or_else(|| tag.date_recorded().map(|date| date.year))
        .or_else(|| tag.get("TDRC").and_then(|f| f.content().text()).and_then(parse_year));

    Ok(TrackMetadata {
        artist: non_blank(tag.artist()),
        title: non_blank(tag.title()),
        album: non_blank(tag.album()),
        genre: non_blank(tag.genre_parsed().as_deref()),
        tempo: tag
            .get("TBPM")
            .and_then(|frame| frame.content().text())
            .and_then(parse_tempo),
        year,
        track_number: tag.track().filter(|n| *n > 0),
    })
}
