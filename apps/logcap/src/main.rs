//! logcap: records a device's app logs to a file until interrupted.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use logcap_capture::{
    ArtifactPlugin, CaptureConfig, CaptureContext, LogCapturePlugin, LogPathResolver,
    StaticPathResolver, TemplatePathResolver,
};
use logcap_protocol::{Channel, DeviceEvent, LaunchAppEvent, RecordLogs, TestOutcome};

#[derive(Parser)]
#[command(name = "logcap")]
#[command(about = "Capture device app logs into per-run log files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.config/logcap/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Tail a device's logs until Ctrl-C, then save them to --output
    Record {
        /// Device whose log paths are resolved from the config templates
        #[arg(short, long)]
        device: String,

        /// Tail this file as stdout instead of the templated path
        #[arg(long)]
        stdout: Option<PathBuf>,

        /// Tail this file as stderr instead of the templated path
        #[arg(long)]
        stderr: Option<PathBuf>,

        /// Where the recording is saved
        #[arg(short, long)]
        output: PathBuf,

        /// Include everything logged since the app launched
        #[arg(long)]
        startup: bool,

        /// Override the configured record-logs mode (none, failing, all)
        #[arg(long)]
        record_logs: Option<RecordLogs>,

        /// Treat the run as failed when applying the keep policy
        #[arg(long)]
        failed: bool,
    },

    /// Show the config file location, optionally writing defaults to it
    Config {
        /// Write the current configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,logcap=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => CaptureConfig::load_from(path)?,
        None => CaptureConfig::load().unwrap_or_else(|e| {
            tracing::warn!("failed to load config, using defaults: {e}");
            CaptureConfig::default()
        }),
    };

    match cli.command {
        Commands::Record {
            device,
            stdout,
            stderr,
            output,
            startup,
            record_logs,
            failed,
        } => {
            let mut config = config;
            if let Some(record_logs) = record_logs {
                config.record_logs = record_logs;
            }

            let outcome = if failed {
                TestOutcome::Failed
            } else {
                TestOutcome::Passed
            };
            let resolver = resolver_for(&config, &device, stdout, stderr);
            record(config, resolver, &device, output, startup, outcome).await
        }
        Commands::Config { init } => {
            if init {
                config.save()?;
                println!("wrote {}", config.file_path().display());
            } else {
                println!("{}", config.file_path().display());
            }
            Ok(())
        }
    }
}

/// Resolves the device's paths once, letting explicit files override the
/// configured templates.
fn resolver_for(
    config: &CaptureConfig,
    device: &str,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
) -> StaticPathResolver {
    let templates = TemplatePathResolver::new(config.log_path_templates.clone());
    let mut resolver = StaticPathResolver::new(templates.resolve_log_paths(device));

    if let Some(path) = stdout {
        resolver = resolver.with(Channel::STDOUT, path);
    }
    if let Some(path) = stderr {
        resolver = resolver.with(Channel::STDERR, path);
    }
    resolver
}

async fn record(
    config: CaptureConfig,
    resolver: StaticPathResolver,
    device: &str,
    output: PathBuf,
    startup: bool,
    outcome: TestOutcome,
) -> Result<()> {
    if !config.record_logs.is_enabled() {
        bail!(
            "log recording is disabled (recordLogs is none in {})",
            config.file_path().display()
        );
    }

    let mut plugin = LogCapturePlugin::new(resolver, CaptureContext::new(config));
    let device_event = DeviceEvent::new(device);

    plugin.on_boot_device(&device_event).await;
    let recording = if startup {
        plugin.create_startup_recording()
    } else {
        plugin.create_test_recording()
    };
    plugin.on_before_launch_app(&device_event).await;
    plugin.on_launch_app(&LaunchAppEvent::new(device)).await;

    recording.start().await?;
    tracing::info!(
        run_id = %plugin.context().run_id,
        sources = plugin.registry().active_count().await,
        "recording, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    recording.stop().await?;
    if plugin.should_keep(outcome) {
        recording.save(&output).await?;
        tracing::info!(path = %output.display(), "log recording saved");
    } else {
        recording.discard().await?;
        tracing::info!(outcome = ?outcome, "log recording discarded by keep policy");
    }

    plugin.on_shutdown_device(&device_event).await;
    plugin.on_terminate().await;
    Ok(())
}
