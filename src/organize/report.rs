use std::{collections::BTreeMap, path::PathBuf};

use super::FailureReason;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedTrack {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub was_renamed: bool,
    pub collision_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTrack {
    pub path: PathBuf,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTrack {
    pub path: PathBuf,
    pub extension: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradedTrack {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistFailure {
    pub playlist: String,
    pub entry: String,
    pub message: String,
}

/// Every discovered track ends up in `placed`, `failed` or `skipped` unless the run was cancelled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub discovered: usize,
    pub placed: Vec<PlacedTrack>,
    pub failed: Vec<FailedTrack>,
    pub skipped: Vec<SkippedTrack>,
    pub degraded: Vec<DegradedTrack>,
    pub playlist_additions: BTreeMap<String, Vec<String>>,
    pub playlist_failures: Vec<PlaylistFailure>,
    pub cancelled: bool,
    pub dry_run: bool,
}

impl RunReport {
    pub fn processed(&self) -> usize {
        self.placed.len() + self.failed.len() + self.skipped.len()
    }

    pub fn additions(&self) -> usize {
        self.playlist_additions.values().map(Vec::len).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.playlist_failures.is_empty()
    }

    pub(crate) fn record_addition(&mut self, playlist: &str, entries: Vec<String>) {
        if entries.is_empty() {
            return;
        }
        self.playlist_additions
            .entry(playlist.to_string())
            .or_default()
            .extend(entries);
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} of {} tracks, {} failed, {} skipped, {} degraded",
            if self.dry_run { "would place" } else { "placed" },
            self.placed.len(),
            self.discovered,
            self.failed.len(),
            self.skipped.len(),
            self.degraded.len(),
        )?;
        write!(
            f,
            ", {} playlist entries added to {} playlists",
            self.additions(),
            self.playlist_additions.len()
        )?;
        if !self.playlist_failures.is_empty() {
            write!(f, ", {} playlist writes failed", self.playlist_failures.len())?;
        }
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_mentions_every_counter() {
        let mut report = RunReport {
            discovered: 3,
            placed: vec![PlacedTrack {
                source: "/in/a.flac".into(),
                destination: "/lib/A - B.flac".into(),
                was_renamed: false,
                collision_count: 0,
            }],
            failed: vec![FailedTrack {
                path: "/in/b.flac".into(),
                reason: FailureReason::io("denied"),
            }],
            cancelled: true,
            ..Default::default()
        };
        report.record_addition("Rock.m3u", vec!["/lib/A - B.flac".to_string()]);
        report.record_addition("Empty.m3u", Vec::new());

        assert_eq!(
            report.to_string(),
            "placed 1 of 3 tracks, 1 failed, 0 skipped, 0 degraded, \
             1 playlist entries added to 1 playlists (cancelled)"
        );
        assert_eq!(report.processed(), 2);
        assert!(!report.is_clean());
    }
}
