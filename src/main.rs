use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use clipinc::audio::{AudioBackend, AudioBackendConfig, AudioFile, FileBackend};
use clipinc::download::{track_filename, Downloader, FileDownloader};
use clipinc::encoder::{
    EncoderOptions, HttpCoverFetcher, LameEncoderFactory, TrackEncoderWorker, TrackOutcome, WorkerConfig,
    WorkerEvent,
};
use clipinc::error::{CaptureError, CaptureResult};
use clipinc::http::{create_router, AppState, HttpContentPort};
use clipinc::session::{
    CaptureController, ControllerPorts, JsonFileSessionStore, LogPresenter, Presenter, SessionStore, TabCapture,
    TabId,
};
use clipinc::{probe_mp3, Config, Track};
use id3::TagLike;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "clipinc")]
#[command(about = "Record browser-tab audio into tagged MP3 files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the capture controller behind the HTTP API
    Serve {
        /// Config file, extension optional
        #[arg(short, long, default_value = "config/clipinc")]
        config: String,
    },
    /// Encode a 16 bit stereo WAV file into a tagged MP3
    Encode {
        wav: PathBuf,

        #[arg(long)]
        artist: String,

        #[arg(long)]
        title: String,

        #[arg(long)]
        album: Option<String>,

        #[arg(long)]
        album_artist: Option<String>,

        #[arg(long)]
        track_number: Option<u32>,

        #[arg(long)]
        disc_number: Option<u32>,

        #[arg(long)]
        year: Option<i32>,

        /// Download sub-directory
        #[arg(long)]
        directory: Option<String>,

        #[arg(long, default_value = "")]
        cover_url: String,

        #[arg(long, default_value = "256")]
        kbps: u16,

        #[arg(short, long, default_value = ".")]
        out_dir: String,

        #[arg(long, default_value = "clipinc")]
        prefix: String,
    },
    /// Print the ID3 tags and stream parameters of an MP3 file
    Inspect { mp3: PathBuf },
}

/// Serves a WAV file as the audio of a single tab
struct FileTabCapture {
    path: PathBuf,
    config: AudioBackendConfig,
    realtime: bool,
}

const FILE_TAB: TabId = 1;

#[async_trait::async_trait]
impl TabCapture for FileTabCapture {
    async fn active_tab(&self) -> CaptureResult<TabId> {
        Ok(FILE_TAB)
    }

    async fn capture(&self, tab: TabId) -> CaptureResult<Box<dyn AudioBackend>> {
        if tab != FILE_TAB {
            return Err(CaptureError::Device(format!("tab {} has no audio", tab)));
        }
        if !self.path.exists() {
            return Err(CaptureError::Device(format!("No stream found at {}", self.path.display())));
        }

        Ok(Box::new(FileBackend::new(&self.path, self.config.clone(), self.realtime)))
    }

    async fn tab_exists(&self, tab: TabId) -> bool {
        tab == FILE_TAB
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clipinc=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Cli::parse().command {
        Command::Serve { config } => serve(&config).await,
        Command::Encode {
            wav,
            artist,
            title,
            album,
            album_artist,
            track_number,
            disc_number,
            year,
            directory,
            cover_url,
            kbps,
            out_dir,
            prefix,
        } => {
            let audio = AudioFile::open(&wav)?;

            let mut track = Track::new(artist, title, (audio.duration_seconds * 1000.0).round() as u64);
            track.album = album;
            track.album_artist = album_artist;
            track.track_number = track_number;
            track.disc_number = disc_number;
            track.release_year = year;
            track.directory = directory;
            track.cover_url = cover_url;

            let out_dir = PathBuf::from(shellexpand::tilde(&out_dir).as_ref());
            encode(audio, track, kbps, out_dir, &prefix).await
        }
        Command::Inspect { mp3 } => inspect(mp3),
    }
}

async fn serve(path: &str) -> Result<()> {
    let cfg = Config::load(path)?;

    info!("Clipinc v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let store = Arc::new(JsonFileSessionStore::open(cfg.storage_path())?);
    store.reset().await?;

    let url = cfg.content.url.clone().context("content.url is required to serve")?;
    let source = cfg.audio.source.clone().context("audio.source is required to serve")?;

    let tabs = FileTabCapture {
        path: PathBuf::from(shellexpand::tilde(&source).as_ref()),
        config: AudioBackendConfig {
            sample_rate: cfg.audio.sample_rate,
            channels: cfg.audio.channels,
            frame_size: cfg.audio.frame_size,
        },
        realtime: cfg.audio.realtime,
    };

    let ports = ControllerPorts {
        store,
        content: Arc::new(HttpContentPort::new(url, Duration::from_secs(5))?),
        tabs: Arc::new(tabs),
        presenter: Arc::new(LogPresenter),
        downloader: Arc::new(FileDownloader::new(cfg.downloads_dir())),
        encoders: Arc::new(LameEncoderFactory),
        covers: Arc::new(HttpCoverFetcher::new(cfg.cover_timeout())?),
    };

    let controller = CaptureController::new(ports, cfg.controller()).spawn();
    let app = create_router(AppState::new(controller.clone()));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
            }
        })
        .await?;

    if let Err(e) = controller.stop_capture().await {
        warn!("Failed to stop capture on shutdown: {}", e);
    }

    Ok(())
}

async fn encode(audio: AudioFile, track: Track, kbps: u16, out_dir: PathBuf, prefix: &str) -> Result<()> {
    let covers = Arc::new(HttpCoverFetcher::new(Duration::from_secs(10))?);
    let (worker, mut events) = TrackEncoderWorker::spawn(Arc::new(LameEncoderFactory), covers)?;

    let progress = tokio::spawn(async move {
        let presenter = LogPresenter;
        while let Some(event) = events.recv().await {
            match event {
                WorkerEvent::Progress { progress } => presenter.progress(progress),
                WorkerEvent::Error { message } => error!("{}", message),
                WorkerEvent::Complete { .. } => {}
            }
        }
    });

    let config = WorkerConfig {
        num_channels: audio.channels,
        sample_rate: audio.sample_rate,
    };
    let options = EncoderOptions {
        kbps,
        ..EncoderOptions::default()
    };
    worker.init(config, options).await?;

    worker.start()?;
    for frame in audio.frames(1024) {
        worker.record(frame)?;
    }

    let outcome = worker.finish(track)?.await?;
    worker.shutdown();
    drop(worker);
    let _ = progress.await;

    let completed = match outcome {
        TrackOutcome::Completed(completed) => completed,
        TrackOutcome::Cancelled => bail!("Track was cancelled"),
        TrackOutcome::Failed(e) => return Err(e.into()),
    };

    let filename = track_filename(prefix, &completed.track);
    let path = FileDownloader::new(out_dir).save(completed.artifact, &filename).await?;

    info!("Wrote {}", path.display());

    Ok(())
}

fn inspect(path: PathBuf) -> Result<()> {
    let bytes = std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;

    match id3::Tag::read_from_path(&path) {
        Ok(tag) => {
            for frame in tag.frames() {
                match frame.content() {
                    id3::Content::Picture(picture) => {
                        println!("{}: {} ({} bytes)", frame.id(), picture.mime_type, picture.data.len())
                    }
                    content => println!("{}: {}", frame.id(), content),
                }
            }
        }
        Err(e) => println!("No ID3 tag: {}", e),
    }

    let info = probe_mp3(bytes)?;
    let unknown = || "?".to_string();
    println!(
        "MP3: {} Hz, {} channels, {} frames",
        info.sample_rate.map(|r| r.to_string()).unwrap_or_else(unknown),
        info.channels.map(|c| c.to_string()).unwrap_or_else(unknown),
        info.packets
    );

    Ok(())
}
