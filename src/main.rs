use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use eframe::egui;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use incision_annotate::config::{DeepLink, StudyConfig};
use incision_annotate::reference::DefaultReferenceSource;
use incision_annotate::sequencer::{ClipSequencer, SessionSettings};
use incision_annotate::submit::UreqTransport;
use incision_annotate::{AnnotateApp, Startup};

#[derive(Parser, Debug)]
#[command(name = "incision-annotate", version)]
struct Cli {
    /// Study configuration JSON. A file picker opens when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pre-fill the participant ID.
    #[arg(long)]
    participant: Option<String>,

    /// Start at the clip with this id.
    #[arg(long)]
    clip: Option<String>,

    /// Start at this 0-based clip index.
    #[arg(long)]
    clip_index: Option<usize>,

    /// Annotate a single ad-hoc video (frame directory or image) first.
    #[arg(long)]
    video: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "incision_annotate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => rfd::FileDialog::new()
            .set_title("Open study configuration")
            .add_filter("JSON", &["json"])
            .pick_file()
            .context("no study configuration selected")?,
    };

    let mut config = StudyConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let link = DeepLink {
        clip: cli.clip,
        clip_index: cli.clip_index,
        video: cli.video,
    };
    let start_index = link.resolve(&mut config.clips).context("resolving start clip")?;

    let settings = SessionSettings::from(&config);
    let root = config.annotations_root().to_string();
    let mut sequencer = ClipSequencer::new(config.clips, settings, root)?;
    if let Some(id) = &cli.participant {
        sequencer.set_participant_id(id);
    }

    let title = format!(
        "incision-annotate — {}",
        config_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("study")
    );

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_title(&title),
        ..Default::default()
    };

    let startup = Startup {
        sequencer,
        submission: config.submission,
        start_index,
        references: Arc::new(DefaultReferenceSource),
        transport: Arc::new(UreqTransport),
    };

    eframe::run_native(
        &title,
        options,
        Box::new(move |cc| Ok(Box::new(AnnotateApp::new(cc, startup)))),
    )
    .map_err(|e| anyhow::anyhow!("failed to run eframe: {e}"))
}
