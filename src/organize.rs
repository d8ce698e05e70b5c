use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use futures::StreamExt;
use thiserror::Error;

use crate::{
    config::{Config, ConfigError},
    library::{self, blocking},
    metadata::{MetadataReader, ReadError, TagReader, TrackMetadata},
    naming::NamingTemplate,
    placement::{self, PlacementError, PlacementResolver, PlacementResult},
    playlist::{self, PlaylistStore},
    scan::{self, ScanParams},
    smart::{PlaylistSelector, SmartSelector},
};

mod report;
pub use report::{
    DegradedTrack, FailedTrack, PlacedTrack, PlaylistFailure, RunReport, SkippedTrack,
};

mod track;
pub use track::{FailureReason, InvalidTransition, Track, TrackStatus};

pub type OrganizeEventSender = tokio::sync::mpsc::Sender<OrganizeEvent>;
pub type OrganizeEventReceiver = tokio::sync::mpsc::Receiver<OrganizeEvent>;

#[derive(Debug, Error)]
pub enum OrganizeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to scan sources: {0}")]
    Scan(#[source] std::io::Error),
    #[error("failed to prepare '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrganizeEvent {
    Discovered {
        total: usize,
    },
    Placed {
        source: PathBuf,
        destination: PathBuf,
        was_renamed: bool,
        dry_run: bool,
    },
    Failed {
        path: PathBuf,
        reason: FailureReason,
    },
    Skipped {
        path: PathBuf,
        extension: String,
    },
    PlaylistUpdated {
        playlist: String,
        added: usize,
    },
    Finished {
        placed: usize,
        failed: usize,
        cancelled: bool,
    },
}

#[derive(Debug)]
pub struct OrganizeEvents {
    receiver: OrganizeEventReceiver,
}

impl OrganizeEvents {
    pub async fn recv(&mut self) -> Option<OrganizeEvent> {
        self.receiver.recv().await
    }

    pub fn recv_blocking(&mut self) -> Option<OrganizeEvent> {
        self.receiver.blocking_recv()
    }
}

/// Cooperative cancellation flag, checked by the engine between tracks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct OrganizeBuilder {
    config: Config,
    reader: Option<Arc<dyn MetadataReader>>,
    selector: Option<Arc<dyn PlaylistSelector>>,
    cancel: CancelToken,
    events: Option<OrganizeEventSender>,
    dry_run: bool,
    workers: Option<usize>,
}

impl OrganizeBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            reader: None,
            selector: None,
            cancel: CancelToken::default(),
            events: None,
            dry_run: false,
            workers: None,
        }
    }

    pub fn with_reader(&mut self, reader: impl MetadataReader) -> &mut Self {
        self.reader = Some(Arc::new(reader));
        self
    }

    pub fn with_selector(&mut self, selector: impl PlaylistSelector) -> &mut Self {
        self.selector = Some(Arc::new(selector));
        self
    }

    pub fn with_cancel(&mut self, cancel: CancelToken) -> &mut Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(&mut self, sender: OrganizeEventSender) -> &mut Self {
        self.events = Some(sender);
        self
    }

    pub fn with_dry_run(&mut self, dry_run: bool) -> &mut Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_workers(&mut self, workers: usize) -> &mut Self {
        self.workers = Some(workers);
        self
    }

    /// Creates the event channel. Events must be drained, the engine waits when it is full.
    pub fn subscribe(&mut self) -> OrganizeEvents {
        let (sender, receiver) = tokio::sync::mpsc::channel(128);
        self.events = Some(sender);
        OrganizeEvents { receiver }
    }

    pub fn build(self) -> Result<OrganizeEngine, OrganizeError> {
        let compiled = self.config.compile()?;
        let rule_names = compiled
            .rules
            .iter()
            .map(|rule| rule.playlist_name.clone())
            .collect();
        let reader: Arc<dyn MetadataReader> = match self.reader {
            Some(reader) => reader,
            None => Arc::new(TagReader::new(self.config.normalized_formats())),
        };
        let selector: Arc<dyn PlaylistSelector> = match self.selector {
            Some(selector) => selector,
            None => Arc::new(SmartSelector::new(compiled.rules)),
        };
        let workers = self.workers.unwrap_or(self.config.workers).max(1);

        Ok(OrganizeEngine {
            config: self.config,
            reader,
            selector,
            rule_names,
            cancel: self.cancel,
            events: self.events,
            dry_run: self.dry_run,
            workers,
        })
    }
}

pub struct OrganizeEngine {
    config: Config,
    reader: Arc<dyn MetadataReader>,
    selector: Arc<dyn PlaylistSelector>,
    rule_names: Vec<String>,
    cancel: CancelToken,
    events: Option<OrganizeEventSender>,
    dry_run: bool,
    workers: usize,
}

struct RunContext {
    resolver: Arc<PlacementResolver>,
    store: Arc<PlaylistStore>,
    destination_dir: PathBuf,
    playlists_dir: PathBuf,
    available: Arc<[String]>,
}

enum Prepared {
    Ready {
        track: Track,
        degraded: Option<String>,
    },
    Broken {
        path: PathBuf,
        reason: FailureReason,
    },
}

impl OrganizeEngine {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub async fn run(&self) -> Result<RunReport, OrganizeError> {
        let source_dirs = self.config.source_paths();
        let destination_dir = self.config.all_songs_path();
        self.organize(&source_dirs, &destination_dir, &self.config.file_naming)
            .await
    }

    /// Only an invalid template or an unusable destination aborts the run.
    pub async fn organize(
        &self,
        source_dirs: &[PathBuf],
        destination_dir: &Path,
        naming_template: &str,
    ) -> Result<RunReport, OrganizeError> {
        let template = NamingTemplate::parse(naming_template)
            .map_err(|err| ConfigError::new(format!("file_naming: {}", err)))?
            .with_max_len(self.config.max_filename_len);

        let mut report = RunReport {
            dry_run: self.dry_run,
            ..Default::default()
        };

        if !self.dry_run {
            tokio::fs::create_dir_all(destination_dir)
                .await
                .map_err(|source| OrganizeError::Io {
                    path: destination_dir.to_path_buf(),
                    source,
                })?;
        }

        let mut params = ScanParams::default()
            .with_extensions(self.config.normalized_formats())
            .with_exclude(destination_dir);
        for dir in source_dirs {
            params.include(dir);
        }
        for dir in self.config.exclude_paths() {
            params.exclude(dir);
        }
        let paths = scan::scan_with(params)
            .await
            .map_err(OrganizeError::Scan)?;
        report.discovered = paths.len();
        evs(&self.events, OrganizeEvent::Discovered { total: paths.len() }).await;

        let playlists_dir = self.config.playlists_path();
        let available = {
            let playlists_dir = playlists_dir.clone();
            let rule_names = self.rule_names.clone();
            blocking(move || library::available_playlists(&playlists_dir, &rule_names)).await
        };
        let available = available.unwrap_or_else(|err| {
            tracing::warn!(
                "failed to list playlists in '{}': {}",
                playlists_dir.display(),
                err
            );
            self.rule_names.clone()
        });

        let run = RunContext {
            resolver: Arc::new(
                PlacementResolver::new(self.config.max_collision_attempts)
                    .with_max_name_len(self.config.max_filename_len),
            ),
            store: Arc::new(PlaylistStore::new(self.config.backup_playlists)),
            destination_dir: destination_dir.to_path_buf(),
            playlists_dir,
            available: available.into(),
        };

        let reader = self.reader.clone();
        let template = Arc::new(template);
        let mut tracks = futures::stream::iter(paths)
            .map(move |path| {
                let reader = reader.clone();
                let template = template.clone();
                async move {
                    let fallback = path.clone();
                    tokio::task::spawn_blocking(move || prepare(path, &*reader, &template))
                        .await
                        .unwrap_or_else(|err| Prepared::Broken {
                            path: fallback,
                            reason: FailureReason::Internal {
                                message: err.to_string(),
                            },
                        })
                }
            })
            .buffered(self.workers);

        loop {
            if self.cancel.is_cancelled() {
                tracing::warn!("organize run cancelled");
                report.cancelled = true;
                break;
            }
            let Some(prepared) = tracks.next().await else {
                break;
            };
            match prepared {
                Prepared::Ready { track, degraded } => {
                    if let Some(message) = degraded {
                        report.degraded.push(DegradedTrack {
                            path: track.source_path().to_path_buf(),
                            message,
                        });
                    }
                    self.process(track, &run, &mut report).await;
                }
                Prepared::Broken { path, reason } => {
                    self.record_failure(&mut report, path, reason).await;
                }
            }
        }

        tracing::info!("{}", report);
        evs(
            &self.events,
            OrganizeEvent::Finished {
                placed: report.placed.len(),
                failed: report.failed.len(),
                cancelled: report.cancelled,
            },
        )
        .await;

        Ok(report)
    }

    async fn process(&self, mut track: Track, run: &RunContext, report: &mut RunReport) {
        match track.status().clone() {
            TrackStatus::Named => {}
            TrackStatus::Failed(FailureReason::UnsupportedFormat { extension }) => {
                let path = track.source_path().to_path_buf();
                evs(
                    &self.events,
                    OrganizeEvent::Skipped {
                        path: path.clone(),
                        extension: extension.clone(),
                    },
                )
                .await;
                report.skipped.push(SkippedTrack { path, extension });
                return;
            }
            TrackStatus::Failed(reason) => {
                self.record_failure(report, track.source_path().to_path_buf(), reason)
                    .await;
                return;
            }
            other => {
                let reason = FailureReason::Internal {
                    message: format!("track reached placement while {}", other),
                };
                self.record_failure(report, track.source_path().to_path_buf(), reason)
                    .await;
                return;
            }
        }

        let Some(candidate) = track.candidate_name().map(str::to_string) else {
            let reason = FailureReason::Internal {
                message: "named track has no candidate name".to_string(),
            };
            self.record_failure(report, track.source_path().to_path_buf(), reason)
                .await;
            return;
        };

        let placed = place(
            run.resolver.clone(),
            track.source_path().to_path_buf(),
            candidate,
            run.destination_dir.clone(),
            self.dry_run,
        )
        .await;

        let placement = match placed {
            Ok(placement) => placement,
            Err(reason) => {
                if let Err(err) = track.fail(reason.clone()) {
                    tracing::error!("{}", err);
                }
                self.record_failure(report, track.source_path().to_path_buf(), reason)
                    .await;
                return;
            }
        };

        if let Err(err) = track.placed(placement.clone()) {
            tracing::error!("{}", err);
        }
        evs(
            &self.events,
            OrganizeEvent::Placed {
                source: track.source_path().to_path_buf(),
                destination: placement.final_path.clone(),
                was_renamed: placement.was_renamed,
                dry_run: self.dry_run,
            },
        )
        .await;
        report.placed.push(PlacedTrack {
            source: track.source_path().to_path_buf(),
            destination: placement.final_path.clone(),
            was_renamed: placement.was_renamed,
            collision_count: placement.collision_count,
        });

        if let Some(metadata) = track.metadata() {
            self.update_playlists(metadata.clone(), &placement.final_path, run, report)
                .await;
        }
    }

    async fn update_playlists(
        &self,
        metadata: TrackMetadata,
        final_path: &Path,
        run: &RunContext,
        report: &mut RunReport,
    ) {
        let selector = self.selector.clone();
        let available = run.available.clone();
        let selected =
            match tokio::task::spawn_blocking(move || selector.select(&metadata, &available)).await
            {
                Ok(selected) => selected,
                Err(err) => {
                    tracing::error!(
                        "playlist selection for '{}' failed: {}",
                        final_path.display(),
                        err
                    );
                    return;
                }
            };

        for name in selected {
            if !run.available.contains(&name) {
                tracing::warn!("ignoring unknown playlist '{}'", name);
                continue;
            }

            let path = run.playlists_dir.join(&name);
            let entry =
                playlist::entry_for(final_path, &run.playlists_dir, self.config.playlist_paths);
            let store = run.store.clone();
            let dry_run = self.dry_run;
            let result = {
                let entry = entry.clone();
                blocking(move || {
                    let mut playlist = store.load(&path)?;
                    let added = playlist.append([entry]);
                    if !added.is_empty() && !dry_run {
                        store.save(&playlist, &path)?;
                    }
                    Ok(added)
                })
                .await
            };

            match result {
                Ok(added) if added.is_empty() => {
                    tracing::debug!("'{}' already lists {}", name, entry);
                }
                Ok(added) => {
                    evs(
                        &self.events,
                        OrganizeEvent::PlaylistUpdated {
                            playlist: name.clone(),
                            added: added.len(),
                        },
                    )
                    .await;
                    report.record_addition(&name, added);
                }
                Err(err) => {
                    tracing::error!("failed to update playlist '{}': {}", name, err);
                    report.playlist_failures.push(PlaylistFailure {
                        playlist: name,
                        entry,
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    async fn record_failure(&self, report: &mut RunReport, path: PathBuf, reason: FailureReason) {
        evs(
            &self.events,
            OrganizeEvent::Failed {
                path: path.clone(),
                reason: reason.clone(),
            },
        )
        .await;
        report.failed.push(FailedTrack { path, reason });
    }
}

fn prepare(path: PathBuf, reader: &dyn MetadataReader, template: &NamingTemplate) -> Prepared {
    let mut track = Track::new(path);
    match prepare_track(&mut track, reader, template) {
        Ok(degraded) => Prepared::Ready { track, degraded },
        Err(err) => Prepared::Broken {
            path: err.path.clone(),
            reason: FailureReason::Internal {
                message: err.to_string(),
            },
        },
    }
}

/// Returns the tag error message when the track fell back to filename metadata.
fn prepare_track(
    track: &mut Track,
    reader: &dyn MetadataReader,
    template: &NamingTemplate,
) -> Result<Option<String>, InvalidTransition> {
    let path = track.source_path().to_path_buf();
    let (metadata, degraded) = match reader.read(&path) {
        Ok(metadata) => (metadata.with_fallback_title(&path), None),
        Err(ReadError::UnsupportedFormat { extension }) => {
            let extension = if extension.is_empty() {
                track.extension().unwrap_or_default().to_ascii_lowercase()
            } else {
                extension
            };
            track.fail(FailureReason::UnsupportedFormat { extension })?;
            return Ok(None);
        }
        Err(ReadError::CorruptTag(message)) => {
            tracing::warn!(
                "unreadable tags in '{}', naming it from the filename: {}",
                path.display(),
                message
            );
            (TrackMetadata::fallback(&path), Some(message))
        }
        Err(ReadError::Io(err)) => {
            track.fail(FailureReason::io(err))?;
            return Ok(None);
        }
    };

    let name = template.name(&metadata, track.extension());
    track.extracted(metadata)?;
    track.named(name)?;
    Ok(degraded)
}

async fn place(
    resolver: Arc<PlacementResolver>,
    source: PathBuf,
    candidate: String,
    destination_dir: PathBuf,
    dry_run: bool,
) -> Result<PlacementResult, FailureReason> {
    let task = tokio::task::spawn_blocking(move || -> Result<PlacementResult, FailureReason> {
        let placement = resolver.resolve(&candidate, &destination_dir)?;
        if !dry_run {
            placement::relocate(&source, &placement.final_path).map_err(|err| {
                FailureReason::io(format!(
                    "moving to '{}': {}",
                    placement.final_path.display(),
                    err
                ))
            })?;
        }
        Ok(placement)
    });
    task.await.unwrap_or_else(|err| {
        Err(FailureReason::Internal {
            message: err.to_string(),
        })
    })
}

impl From<PlacementError> for FailureReason {
    fn from(err: PlacementError) -> Self {
        match err {
            PlacementError::Exhausted {
                candidate,
                attempts,
            } => FailureReason::PlacementExhausted {
                candidate,
                attempts,
            },
            err @ PlacementError::Io { .. } => FailureReason::io(err),
        }
    }
}

async fn evs(sender: &Option<OrganizeEventSender>, ev: OrganizeEvent) {
    match &ev {
        OrganizeEvent::Discovered { total } => tracing::info!("found {} tracks to organize", total),
        OrganizeEvent::Placed {
            source,
            destination,
            dry_run,
            ..
        } => {
            if *dry_run {
                tracing::info!("would place {} -> {}", source.display(), destination.display())
            } else {
                tracing::info!("placed {} -> {}", source.display(), destination.display())
            }
        }
        OrganizeEvent::Failed { path, reason } => {
            tracing::error!("failed to organize {}: {}", path.display(), reason)
        }
        OrganizeEvent::Skipped { path, extension } => {
            tracing::info!("skipping {} (unsupported format '{}')", path.display(), extension)
        }
        OrganizeEvent::PlaylistUpdated { playlist, added } => {
            tracing::debug!("added {} entries to {}", added, playlist)
        }
        OrganizeEvent::Finished { .. } => {}
    }
    if let Some(sender) = sender {
        if let Err(err) = sender.send(ev).await {
            tracing::error!("failed to send event: {}", err);
        }
    }
}
