use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use console::style;
use slidecast_core::{
    CheckpointStore, FrameLibrary, HttpTranscriptionService, MediaPipeline, PipelineConfig,
    PipelineRequest, PipelineServices, Slide, SlideDeck, SourceAsset, TranscriptionProvider,
    WorkflowTracker, asset_id,
    cache::get_transcript_path,
    format::{format_duration, format_frame_list, format_timestamp},
    frames::map_frames_to_slides,
    get_asset_dir, get_root_cache_dir,
    storage::FsBlobStore,
};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    media::Ffmpeg,
    pipeline::{ObserverOptions, start_observers},
};

mod media;
mod pipeline;
mod workers;

/// CLI wrapper for TranscriptionProvider (needed for clap ValueEnum)
#[derive(Clone, Default, ValueEnum)]
enum CliProvider {
    #[default]
    Openai,
    Groq,
}

impl From<CliProvider> for TranscriptionProvider {
    fn from(cli: CliProvider) -> Self {
        match cli {
            CliProvider::Openai => TranscriptionProvider::OpenAi,
            CliProvider::Groq => TranscriptionProvider::Groq,
        }
    }
}

#[derive(Parser)]
#[command(name = "slidecast")]
#[command(about = "Chunk a recording, transcribe it and grab slide frames")]
struct Cli {
    /// Audio or video file
    file: PathBuf,

    /// Seconds to capture frames at, comma separated (e.g. "12.5,90,301")
    #[arg(long, value_delimiter = ',')]
    frames: Vec<f64>,

    /// Transcription provider
    #[arg(short, long, default_value = "openai")]
    provider: CliProvider,

    /// TOML file with pipeline limits
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the per-chunk byte limit, in MiB
    #[arg(long)]
    max_chunk_mb: Option<u64>,

    /// Override the per-chunk duration limit, in seconds
    #[arg(long)]
    max_chunk_secs: Option<f64>,

    /// Ignore any checkpoint from a previous run
    #[arg(long)]
    fresh: bool,

    /// Write every pipeline event to events.jsonl next to the transcript
    #[arg(long)]
    events_json: bool,
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("m4a") => "audio/mp4",
        Some("ogg" | "opus") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("mov") => "video/quicktime",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

fn mib_to_bytes(mb: u64) -> Result<u64> {
    match mb.checked_mul(1024 * 1024) {
        Some(bytes) => Ok(bytes),
        None => bail!("--max-chunk-mb {mb} is too large"),
    }
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(mb) = cli.max_chunk_mb {
        config.max_chunk_bytes = mib_to_bytes(mb)?;
    }
    if let Some(secs) = cli.max_chunk_secs {
        config.max_chunk_secs = secs;
    }
    config.validate()?;
    Ok(config)
}

async fn load_frame_library(path: &Path) -> FrameLibrary {
    let Ok(raw) = fs::read_to_string(path).await else {
        return FrameLibrary::new();
    };
    match serde_json::from_str(&raw) {
        Ok(library) => library,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable frame library");
            FrameLibrary::new()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("slidecast=info,slidecast_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let provider: TranscriptionProvider = cli.provider.clone().into();

    // Validate API key early
    if let Err(e) = provider.validate_api_key() {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }

    let config = load_config(&cli)?;

    let metadata = fs::metadata(&cli.file)
        .await
        .with_context(|| format!("reading {}", cli.file.display()))?;
    let asset = SourceAsset::new(
        asset_id(&cli.file, metadata.len()),
        &cli.file,
        metadata.len(),
        content_type_for(&cli.file),
    );

    let root_cache_dir = get_root_cache_dir();
    let asset_dir = get_asset_dir(&root_cache_dir, &asset.id);
    fs::create_dir_all(&asset_dir).await?;

    let checkpoints = CheckpointStore::new(&root_cache_dir);
    if cli.fresh {
        checkpoints.clear(&asset.id).await?;
    }

    println!(
        "\n{}  {}\n",
        style("slidecast").cyan().bold(),
        style("Media Transcriber").dim()
    );
    println!(
        "{} {} {}",
        style("✓").green().bold(),
        style(cli.file.display()).bold(),
        style(format!("[{}]", asset.id)).dim()
    );
    println!("{}", style("─".repeat(60)).dim());

    let observers = start_observers(ObserverOptions {
        slides_root: root_cache_dir.clone(),
        event_log: cli.events_json.then(|| asset_dir.join("events.jsonl")),
    })?;

    let store = Arc::new(FsBlobStore::new(&root_cache_dir));
    let ffmpeg = Arc::new(Ffmpeg);
    let services = PipelineServices {
        probe: ffmpeg.clone(),
        materializer: ffmpeg.clone(),
        renderer: ffmpeg,
        store: store.clone(),
        transcriber: Arc::new(HttpTranscriptionService::new(provider, store)?),
    };
    let tracker = WorkflowTracker::new((*observers.bus).clone());
    let pipeline = MediaPipeline::new(config, services, tracker)?.with_checkpoints(checkpoints);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping after the current chunk");
                cancel.cancel();
            }
        }
    });

    let library_path = asset_dir.join("frames.json");
    let mut library = load_frame_library(&library_path).await;
    let frame_timestamps = cli.frames.clone();

    let total_start = Instant::now();
    let result = pipeline
        .run(
            PipelineRequest {
                asset: asset.clone(),
                frame_timestamps: frame_timestamps.clone(),
            },
            &mut library,
            &cancel,
        )
        .await;

    if !library.is_empty() {
        fs::write(&library_path, serde_json::to_string_pretty(&library)?).await?;
    }

    if let Ok(report) = &result
        && report.frames.is_some()
    {
        let slides: Vec<Slide> = frame_timestamps
            .iter()
            .map(|t| Slide::new(format!("Slide at {}", format_timestamp(*t)), "").at(*t))
            .collect();
        let mut deck = SlideDeck::new(asset.id.clone(), slides, (*observers.bus).clone())?;
        let mapped = map_frames_to_slides(&mut deck, &library);
        deck.publish();
        info!(slides = deck.len(), mapped, "slide deck updated");
    }

    observers.shutdown().await;
    let report = result?;

    println!(
        "\n{} {} {}",
        style("Outcome:").dim(),
        style(&report.outcome).cyan().bold(),
        style(format!(
            "[{} chunk(s), {} resumed]",
            report.plan.len(),
            report.resumed
        ))
        .dim()
    );
    println!(
        "{} {}\n",
        style("Total time:").dim(),
        style(format_duration(total_start.elapsed())).cyan().bold()
    );

    if let Some(transcript) = &report.transcript {
        let transcript_path = get_transcript_path(&asset_dir);
        fs::write(&transcript_path, transcript.text()).await?;
        println!(
            "{} {}\n",
            style("Saved:").dim(),
            style(transcript_path.display()).cyan()
        );
        println!("{}", style("─".repeat(60)).dim());
        println!("{}", transcript.render());
    }

    if !library.is_empty() && !frame_timestamps.is_empty() {
        println!("{}", style("─".repeat(60)).dim());
        println!("{}", format_frame_list(&library));
    }

    Ok(())
}
