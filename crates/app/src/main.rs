use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{Parser, Subcommand};
use ledctl_core::{AppConfig, Builtin, Renderer, SourceDescriptor};
use tracing_subscriber::EnvFilter;

fn main() -> ledctl_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            source,
            seconds,
            preview,
        } => run(config.as_deref(), &source, seconds, preview.as_deref()),
        Commands::Check { config } => check(&config),
    }
}

fn load_config(path: Option<&Path>) -> ledctl_core::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path),
        None => Ok(AppConfig::default()),
    }
}

fn run(
    config: Option<&Path>,
    source: &str,
    seconds: u64,
    preview: Option<&Path>,
) -> ledctl_core::Result<()> {
    let config = load_config(config)?;
    let descriptor = parse_source(source)?;

    let renderer = Renderer::spawn(&config)?;
    let controller = renderer.controller();
    let status = controller.start(descriptor)?;
    tracing::info!(
        source = status.active_source_id.as_deref().unwrap_or_default(),
        device = %status.device,
        seconds,
        "playing"
    );

    std::thread::sleep(Duration::from_secs(seconds));

    let status = controller.status()?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    if let Some(path) = preview {
        std::fs::write(path, controller.preview()?)?;
        tracing::info!(path = %path.display(), "wrote preview");
    }

    controller.stop()?;
    renderer.shutdown()
}

fn check(path: &Path) -> ledctl_core::Result<()> {
    let config = AppConfig::load(path)?;
    let (_, mapper) = config.device.build()?;
    let size = mapper.size();
    println!(
        "{}: {} device, {}x{} canvas, {} LEDs, fps cap {}",
        path.display(),
        config.device.type_name(),
        size.width,
        size.height,
        mapper.pixel_count(),
        config.engine.fps_cap
    );
    Ok(())
}

/// Accepts an inline JSON descriptor, `builtin:NAME[:TEXT]`, or a file path
/// (`.gif` plays as an animation).
fn parse_source(arg: &str) -> ledctl_core::Result<SourceDescriptor> {
    if arg.trim_start().starts_with('{') {
        return Ok(serde_json::from_str(arg)?);
    }
    if let Some(spec) = arg.strip_prefix("builtin:") {
        let mut fields = serde_json::Map::new();
        let (name, text) = match spec.split_once(':') {
            Some((name, text)) => (name, Some(text)),
            None => (spec, None),
        };
        fields.insert("name".into(), name.into());
        if let Some(text) = text {
            fields.insert("text".into(), text.into());
        }
        let builtin: Builtin = serde_json::from_value(fields.into())?;
        return Ok(SourceDescriptor::Builtin { builtin });
    }
    let path = PathBuf::from(arg);
    let is_gif = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gif"));
    Ok(if is_gif {
        SourceDescriptor::Animation {
            path,
            looping: true,
        }
    } else {
        SourceDescriptor::Image { path }
    })
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive LED displays from images, animations and generators", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play one source on the configured device for a while.
    Run {
        /// JSON configuration file; a 10x10 preview device when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Inline JSON descriptor, `builtin:NAME[:TEXT]`, or an image/GIF path.
        #[arg(short, long)]
        source: String,
        /// How long to play before stopping.
        #[arg(long, default_value_t = 5)]
        seconds: u64,
        /// Write the last rendered frame to this PNG file.
        #[arg(long)]
        preview: Option<PathBuf>,
    },
    /// Validate a configuration file without touching any hardware.
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
}
