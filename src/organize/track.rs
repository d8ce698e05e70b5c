use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::{
    metadata::{AudioFormat, TrackMetadata},
    placement::PlacementResult,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("unsupported format '{extension}'")]
    UnsupportedFormat { extension: String },
    #[error("io error: {message}")]
    Io { message: String },
    #[error("no free name for '{candidate}' after {attempts} attempts")]
    PlacementExhausted { candidate: String, attempts: u32 },
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl FailureReason {
    pub fn io(err: impl std::fmt::Display) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackStatus {
    Discovered,
    MetadataExtracted,
    Named,
    Placed,
    Failed(FailureReason),
}

impl TrackStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::MetadataExtracted => "metadata extracted",
            Self::Named => "named",
            Self::Placed => "placed",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Placed | Self::Failed(_))
    }

    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Discovered => 0,
            Self::MetadataExtracted => 1,
            Self::Named => 2,
            Self::Placed | Self::Failed(_) => 3,
        }
    }
}

impl std::fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed ({})", reason),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("'{}' cannot go from {from} to {to}", path.display())]
pub struct InvalidTransition {
    pub path: PathBuf,
    pub from: &'static str,
    pub to: &'static str,
}

/// Status only moves forward, with a `Failed` exit from any pending state.
#[derive(Debug, Clone)]
pub struct Track {
    source_path: PathBuf,
    format: Option<AudioFormat>,
    metadata: Option<TrackMetadata>,
    candidate_name: Option<String>,
    placement: Option<PlacementResult>,
    status: TrackStatus,
}

impl Track {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        let source_path = source_path.into();
        Self {
            format: AudioFormat::detect(&source_path),
            source_path,
            metadata: None,
            candidate_name: None,
            placement: None,
            status: TrackStatus::Discovered,
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn format(&self) -> Option<&AudioFormat> {
        self.format.as_ref()
    }

    pub fn metadata(&self) -> Option<&TrackMetadata> {
        self.metadata.as_ref()
    }

    pub fn candidate_name(&self) -> Option<&str> {
        self.candidate_name.as_deref()
    }

    pub fn placement(&self) -> Option<&PlacementResult> {
        self.placement.as_ref()
    }

    pub fn status(&self) -> &TrackStatus {
        &self.status
    }

    pub fn extension(&self) -> Option<&str> {
        self.source_path.extension().and_then(|ext| ext.to_str())
    }

    pub fn extracted(&mut self, metadata: TrackMetadata) -> Result<(), InvalidTransition> {
        self.advance(TrackStatus::MetadataExtracted)?;
        self.metadata = Some(metadata);
        Ok(())
    }

    pub fn named(&mut self, candidate_name: String) -> Result<(), InvalidTransition> {
        self.advance(TrackStatus::Named)?;
        self.candidate_name = Some(candidate_name);
        Ok(())
    }

    pub fn placed(&mut self, placement: PlacementResult) -> Result<(), InvalidTransition> {
        self.advance(TrackStatus::Placed)?;
        self.placement = Some(placement);
        Ok(())
    }

    pub fn fail(&mut self, reason: FailureReason) -> Result<(), InvalidTransition> {
        self.advance(TrackStatus::Failed(reason))
    }

    fn advance(&mut self, next: TrackStatus) -> Result<(), InvalidTransition> {
        let allowed = match next {
            TrackStatus::Failed(_) => self.status.is_pending(),
            _ => self.status.is_pending() && next.rank() == self.status.rank() + 1,
        };
        if !allowed {
            return Err(InvalidTransition {
                path: self.source_path.clone(),
                from: self.status.name(),
                to: next.name(),
            });
        }
        tracing::debug!(
            "{}: {} -> {}",
            self.source_path.display(),
            self.status.name(),
            next
        );
        self.status = next;
        Ok(())
    }
}
