use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::ProgressStyle;
use musicorg::{
    organize::{OrganizeEvent, OrganizeEvents},
    CancelToken, Config, OrganizeBuilder, PlaylistSelector, SmartSelector, TrackMetadata,
};
use serde::Serialize;

#[derive(Debug, Parser)]
#[clap(version, about)]
struct Args {
    #[clap(flatten)]
    group_config: GroupConfig,

    #[clap(subcommand)]
    subcmd: SubCmd,
}

#[derive(Debug, Parser)]
struct GroupConfig {
    /// Path to the configuration file.
    ///
    /// Defaults to $XDG_CONFIG_HOME/musicorg/config.json or ~/.config/musicorg/config.json.
    /// A missing file means the default configuration.
    #[clap(long, global = true, env = "MUSICORG_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Debug, Parser)]
enum SubCmd {
    Organize(OrganizeArgs),
    Config(ConfigArgs),
    InitPlaylists(InitPlaylistsArgs),
    RewritePrefix(RewritePrefixArgs),
    Export(ExportArgs),
}

/// Move audio files from the source directories into the library and update playlists.
#[derive(Debug, Parser)]
struct OrganizeArgs {
    /// Source directory to organize.
    ///
    /// Can be given multiple times. When set, the configured source directories are ignored.
    #[clap(long, short)]
    source: Vec<PathBuf>,

    /// Report what would happen without moving files or writing playlists.
    #[clap(long)]
    dry_run: bool,

    /// Ask which playlists each track should be added to.
    ///
    /// Playlists matched by the smart playlist rules are preselected.
    #[clap(long)]
    interactive: bool,

    /// Number of workers reading metadata.
    #[clap(long)]
    workers: Option<usize>,
}

/// Show the resolved configuration.
#[derive(Debug, Parser)]
struct ConfigArgs {
    /// Print the configuration as json.
    #[clap(long)]
    json: bool,

    /// Write the default configuration if the configuration file does not exist.
    #[clap(long)]
    init: bool,
}

/// Create an empty playlist file for every configured smart playlist.
#[derive(Debug, Parser)]
struct InitPlaylistsArgs {}

/// Rewrite the leading path of every entry in every playlist of a directory.
#[derive(Debug, Parser)]
struct RewritePrefixArgs {
    /// Directory containing the playlists. Defaults to the configured playlists directory.
    dir: Option<PathBuf>,

    /// Prefix to replace. When empty the new prefix is prepended to every entry.
    #[clap(long, default_value = "")]
    old: String,

    /// Replacement prefix.
    #[clap(long)]
    new: String,
}

/// Write a playlist of every supported file under a directory, with relative paths.
#[derive(Debug, Parser)]
struct ExportArgs {
    /// Directory to export.
    dir: PathBuf,

    /// Playlist to write. Defaults to DIR/music_playlist.m3u.
    #[clap(long)]
    output: Option<PathBuf>,
}

/// Prompts for the playlists of every placed track, preselecting the smart playlist matches.
struct InquireSelector {
    smart: SmartSelector,
}

impl PlaylistSelector for InquireSelector {
    fn select(&self, metadata: &TrackMetadata, available: &[String]) -> BTreeSet<String> {
        let suggested = self.smart.select(metadata, available);
        if available.is_empty() {
            return suggested;
        }

        let defaults = available
            .iter()
            .enumerate()
            .filter(|(_, name)| suggested.contains(*name))
            .map(|(idx, _)| idx)
            .collect::<Vec<_>>();
        let message = format!(
            "Playlists for {} - {}",
            metadata.artist.as_deref().unwrap_or("Unknown Artist"),
            metadata.title.as_deref().unwrap_or("Unknown Title"),
        );

        match inquire::MultiSelect::new(&message, available.to_vec())
            .with_default(&defaults)
            .prompt()
        {
            Ok(chosen) => chosen.into_iter().collect(),
            Err(err) => {
                tracing::warn!("playlist prompt failed ({}), using smart playlists", err);
                suggested
            }
        }
    }
}

async fn subcmd_organize(args: OrganizeArgs, mut config: Config) -> Result<()> {
    if !args.source.is_empty() {
        config.source_dirs = args.source;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }

    let cancel = CancelToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, stopping after the current track");
                cancel.cancel();
            }
        }
    });

    let mut builder = OrganizeBuilder::new(config.clone());
    builder.with_dry_run(args.dry_run).with_cancel(cancel);
    if args.interactive {
        let rules = config.smart_rules()?;
        builder.with_selector(InquireSelector {
            smart: SmartSelector::new(rules),
        });
    }
    let events = builder.subscribe();
    let engine = builder.build()?;

    let disable_progress =
        args.interactive || std::env::var_os("MUSICORG_DISABLE_PROGRESS").is_some();
    let handle = tokio::spawn(helper_organize_progress(events, disable_progress));
    let report = engine.run().await?;
    drop(engine);
    handle.await??;

    for failed in &report.failed {
        eprintln!("failed: {}: {}", failed.path.display(), failed.reason);
    }
    for failure in &report.playlist_failures {
        eprintln!(
            "playlist not updated: {}: {}",
            failure.playlist, failure.message
        );
    }
    println!("{}", report);

    Ok(())
}

async fn subcmd_config(args: ConfigArgs, config_path: &Path, config: Config) -> Result<()> {
    if args.init && !config_path.exists() {
        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("creating configuration directory")?;
        }
        helper_write_json(config_path, &config).await?;
        tracing::info!("wrote default configuration to {}", config_path.display());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        let smart_playlists = config
            .smart_playlists
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>();
        println!("Configuration file: {}", config_path.display());
        println!("Music root: {}", config.music_root_path().display());
        println!("All songs directory: {}", config.all_songs_path().display());
        println!("Playlists directory: {}", config.playlists_path().display());
        println!("Source directories: {:?}", config.source_paths());
        println!("Supported formats: {:?}", config.normalized_formats());
        println!("Smart playlists: {:?}", smart_playlists);
        println!("File naming: {}", config.file_naming);
    }

    config.validate()?;
    Ok(())
}

async fn subcmd_init_playlists(_args: InitPlaylistsArgs, config: Config) -> Result<()> {
    config.validate()?;
    let created = musicorg::library::create_smart_playlists(&config)
        .await
        .context("creating smart playlists")?;
    for path in &created {
        println!("created {}", path.display());
    }
    if created.is_empty() {
        println!("all smart playlists already exist");
    }
    Ok(())
}

async fn subcmd_rewrite_prefix(args: RewritePrefixArgs, config: Config) -> Result<()> {
    let dir = args.dir.unwrap_or_else(|| config.playlists_path());
    let rewrites =
        musicorg::library::rewrite_prefix_all(&dir, &args.old, &args.new, config.backup_playlists)
            .await
            .with_context(|| format!("rewriting playlists in {}", dir.display()))?;
    for rewrite in rewrites {
        println!("{} {}", rewrite.rewritten, rewrite.playlist.display());
    }
    Ok(())
}

async fn subcmd_export(args: ExportArgs, config: Config) -> Result<()> {
    let (output, count) = musicorg::library::export_directory(
        &args.dir,
        args.output.as_deref(),
        &config.normalized_formats(),
        config.backup_playlists,
    )
    .await
    .with_context(|| format!("exporting {}", args.dir.display()))?;
    println!("wrote {} entries to {}", count, output.display());
    Ok(())
}

async fn helper_organize_progress(mut events: OrganizeEvents, disable_progress: bool) -> Result<()> {
    if disable_progress {
        while events.recv().await.is_some() {}
        return Ok(());
    }

    let pb = indicatif::ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}",
    )?
    .progress_chars("##-");
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(200));

    while let Some(ev) = events.recv().await {
        match ev {
            OrganizeEvent::Discovered { total } => pb.set_length(total as u64),
            OrganizeEvent::Placed { destination, .. } => {
                pb.inc(1);
                pb.set_message(format!("Placed {}", helper_file_name(&destination)));
            }
            OrganizeEvent::Failed { path, .. } => {
                pb.inc(1);
                pb.set_message(format!("Failed {}", helper_file_name(&path)));
            }
            OrganizeEvent::Skipped { path, .. } => {
                pb.inc(1);
                pb.set_message(format!("Skipped {}", helper_file_name(&path)));
            }
            OrganizeEvent::PlaylistUpdated { .. } => {}
            OrganizeEvent::Finished { cancelled, .. } => {
                if cancelled {
                    pb.abandon_with_message("Cancelled");
                } else {
                    pb.finish_with_message("Done");
                }
            }
        }
    }

    Ok(())
}

fn helper_file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn helper_config_path(group: &GroupConfig) -> Result<PathBuf> {
    if let Some(path) = &group.config {
        return Ok(path.clone());
    }
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(dir).join("musicorg/config.json"));
    }
    let home = std::env::var("HOME").context("getting $HOME")?;
    Ok(PathBuf::from(home).join(".config/musicorg/config.json"))
}

async fn helper_read_config(path: &Path) -> Result<Config> {
    let json = match tokio::fs::read_to_string(path).await {
        Ok(json) => json,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("{} does not exist, using defaults", path.display());
            return Ok(Config::default());
        }
        Err(err) => return Err(err).context("reading configuration file"),
    };
    let config = serde_json::from_str(&json)
        .with_context(|| format!("deserializing configuration file {}", path.display()))?;
    Ok(config)
}

async fn helper_write_json<T>(path: &Path, v: &T) -> Result<()>
where
    T: Serialize,
{
    let serialized = serde_json::to_string_pretty(v).context("serializing json")?;
    tokio::fs::write(path, serialized)
        .await
        .context("writing json")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn,musicorg=info"))?;
    tracing_subscriber::fmt::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config_path = helper_config_path(&args.group_config)?;
    let config = helper_read_config(&config_path).await?;
    match args.subcmd {
        SubCmd::Organize(args) => subcmd_organize(args, config).await?,
        SubCmd::Config(args) => subcmd_config(args, &config_path, config).await?,
        SubCmd::InitPlaylists(args) => subcmd_init_playlists(args, config).await?,
        SubCmd::RewritePrefix(args) => subcmd_rewrite_prefix(args, config).await?,
        SubCmd::Export(args) => subcmd_export(args, config).await?,
    };

    Ok(())
}
