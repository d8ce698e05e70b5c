use std::path::Path;

use lofty::{Accessor, ItemKey, TaggedFileExt};

use super::{non_blank, parse_tempo, parse_track_number, parse_year, ReadError, TrackMetadata};

pub(super) fn read(path: &Path) -> Result<TrackMetadata, ReadError> {
    // surface unreadable files as io errors, everything lofty rejects afterwards is the tag's fault
    std::fs::metadata(path)?;

    let tagged = lofty::read_from_path(path).map_err(|err| {
        tracing::debug!("failed to probe '{}': {}", path.display(), err);
        ReadError::CorruptTag(err.to_string())
    })?;

    let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) else {
        tracing::debug!("{} has no tags", path.display());
        return Ok(TrackMetadata::default());
    };

    let year = tag
        .year()
        .and_then(|year| i32::try_from(year).ok())
        .filter(|year| *year > 0)
        .or_else(|| tag.get_string(&ItemKey::RecordingDate).and_then(parse_year));

    Ok(TrackMetadata {
        artist: non_blank(tag.artist().as_deref()),
        title: non_blank(tag.title().as_deref()),
        album: non_blank(tag.album().as_deref()),
        genre: non_blank(tag.genre().as_deref()),
        tempo: tag.get_string(&ItemKey::Bpm).and_then(parse_tempo),
        year,
        track_number: tag
            .track()
            .filter(|n| *n > 0)
            .or_else(|| tag.get_string(&ItemKey::TrackNumber).and_then(parse_track_number)),
    })
}
