//! CLI entry point for camctl.
//!
//! # Usage
//!
//! ```bash
//! camctl transport list
//! camctl list
//! camctl camera cam0 info
//! camctl camera serial:21000000 tree --filter 'Trigger*'
//! camctl camera host:127.0.0.1 set ExposureTime 20000
//! camctl camera cam0 acquire -n 5 -e 0.05 --trigger software
//! ```
//!
//! Tables and frame lines go to stdout; logs go to stderr.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info, warn};

use camctl::acquisition::{
    cancel_pair, trigger_channel, AcquisitionConfig, AcquisitionSession, Binning, FailurePolicy,
    FrameCount, Roi, TriggerMode, TriggerReceiver,
};
use camctl::config::CamctlConfig;
use camctl::hardware::{DeviceHandle, DeviceSelector, MockTransport, TransportRegistry};
use camctl::parameter::{ParameterTree, ParameterValue};
use camctl::render::{self, NameFilter};
use camctl::tracing_setup;

#[derive(Parser)]
#[command(name = "camctl", version)]
#[command(about = "Industrial camera control and acquisition", long_about = None)]
struct Cli {
    /// Log level (overrides the configuration file)
    #[arg(long, global = true, value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// Configuration file (default: config/camctl.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transport layers
    Transport {
        #[command(subcommand)]
        command: TransportCommand,
    },

    /// List reachable devices
    List {
        /// Only devices of this class (e.g. GigEVision, Emulation)
        #[arg(long)]
        class: Option<String>,

        /// Shell-style filter on column names
        #[arg(long, default_value = "*")]
        filter: String,
    },

    /// Operate on one camera
    Camera {
        /// host:<name|ip>, model:<name>, serial:<sn>, name:<user name>, or a bare
        /// serial number, user name or full name
        selector: String,

        #[command(subcommand)]
        command: CameraCommand,
    },
}

#[derive(Subcommand)]
enum TransportCommand {
    /// List registered transports
    List,
}

#[derive(Subcommand)]
enum CameraCommand {
    /// Device information
    Info,

    /// Parameter tree
    Tree {
        /// Shell-style filter on parameter names
        #[arg(long, default_value = "*")]
        filter: String,
    },

    /// Parameter table
    Table {
        /// Shell-style filter on parameter names
        #[arg(long, default_value = "*")]
        filter: String,
    },

    /// Show one parameter (or every parameter of a group)
    Get {
        /// Parameter path or name (e.g. AOI/Width, ExposureTime)
        path: String,
    },

    /// Write one parameter
    Set {
        /// Parameter path or name
        path: String,
        /// New value, parsed according to the parameter type
        value: String,
    },

    /// Execute a command parameter
    Invoke {
        /// Parameter path or name (e.g. TriggerSoftware)
        path: String,
    },

    /// Acquire frames
    Acquire(AcquireArgs),
}

#[derive(Args)]
struct AcquireArgs {
    /// Number of frames (0 = until Ctrl+C)
    #[arg(short = 'n', long)]
    nb_frames: Option<u64>,

    /// Exposure time in seconds
    #[arg(short = 'e', long)]
    exposure: Option<f64>,

    /// Extra time between frames in seconds
    #[arg(short = 'l', long)]
    latency: Option<f64>,

    /// internal or software (software fires one frame per line on stdin)
    #[arg(long)]
    trigger: Option<TriggerMode>,

    /// Region of interest as x,y,width,height
    #[arg(long)]
    roi: Option<Roi>,

    /// Binning as h,v or a single factor
    #[arg(long)]
    binning: Option<Binning>,

    /// Pixel format (e.g. Mono8, Mono12)
    #[arg(long)]
    pixel_format: Option<String>,

    /// Keep going after a timeout or failed buffer
    #[arg(long)]
    skip_failures: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => CamctlConfig::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => CamctlConfig::load().context("loading configuration")?,
    };
    if let Some(level) = cli.log_level {
        config.application.log_level = level;
    }
    tracing_setup::init_from_config(&config)?;

    let registry = build_registry(&config);

    match cli.command {
        Commands::Transport {
            command: TransportCommand::List,
        } => {
            let transports = registry.enumerate_transports();
            println!("{}", render::transport_table(&transports));
        }
        Commands::List { class, filter } => {
            let filter = NameFilter::new(&filter)?;
            let devices = registry.enumerate_devices(class.as_deref()).await?;
            if devices.is_empty() {
                println!("No devices found");
            } else {
                println!("{}", render::camera_table(&devices, &filter));
            }
        }
        Commands::Camera { selector, command } => {
            let selector: DeviceSelector = selector.parse()?;
            let handle = Arc::new(registry.open_device(&selector).await?);
            run_camera_command(&config, handle, command).await?;
        }
    }

    Ok(())
}

fn build_registry(config: &CamctlConfig) -> TransportRegistry {
    let mut registry = TransportRegistry::new();
    if config.emulation.enabled {
        registry.register(Arc::new(MockTransport::with_config(
            config.emulation.camera_count,
            config.emulation.camera.clone(),
        )));
    }
    registry
}

async fn run_camera_command(
    config: &CamctlConfig,
    handle: Arc<DeviceHandle>,
    command: CameraCommand,
) -> Result<()> {
    match command {
        CameraCommand::Info => {
            let info = handle
                .device()
                .device_info()
                .await
                .context("reading device information")?;
            println!("{}", render::device_info(handle.descriptor(), &info));
        }
        CameraCommand::Tree { filter } => {
            let filter = NameFilter::new(&filter)?;
            let tree = open_tree(config, handle).await?;
            let rendered = render::parameter_tree(&tree.snapshot(), &filter);
            if rendered.is_empty() {
                println!("No parameter matches '{}'", filter.pattern());
            } else {
                println!("{}", rendered);
            }
        }
        CameraCommand::Table { filter } => {
            let filter = NameFilter::new(&filter)?;
            let tree = open_tree(config, handle).await?;
            println!("{}", render::parameter_table(&tree.snapshot(), &filter));
        }
        CameraCommand::Get { path } => {
            let tree = open_tree(config, handle).await?;
            let (_, node) = tree.resolve(&path)?;
            if node.is_group() {
                for line in render::parameter_lines(&node, &NameFilter::any()) {
                    println!("{}", line);
                }
            } else {
                println!("{}", render::parameter_display(&node));
            }
        }
        CameraCommand::Set { path, value } => {
            let tree = open_tree(config, handle).await?;
            let (canonical, node) = tree.resolve(&path)?;
            let value = ParameterValue::parse(node.kind(), &value)
                .map_err(|e| anyhow!("{}: {}", canonical, e))?;
            tree.set(&canonical, value).await?;
            let (_, node) = tree.resolve(&canonical)?;
            println!("{}", render::parameter_display(&node));
        }
        CameraCommand::Invoke { path } => {
            let tree = open_tree(config, handle).await?;
            let (canonical, _) = tree.resolve(&path)?;
            tree.invoke(&canonical).await?;
            println!("{} executed", canonical);
        }
        CameraCommand::Acquire(args) => {
            let acq = acquisition_config(config, args)?;
            let tree = open_tree(config, handle).await?;
            acquire(&tree, acq).await?;
        }
    }
    Ok(())
}

/// Build the parameter tree and apply the transport settings.
async fn open_tree(config: &CamctlConfig, handle: Arc<DeviceHandle>) -> Result<ParameterTree> {
    let tree = ParameterTree::build(handle).await?;
    let written = config.transport.apply(&tree).await?;
    debug!(written, device = %tree.device().name(), "transport settings applied");
    Ok(tree)
}

fn seconds(value: f64, what: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("invalid {}: {}", what, value))
}

fn acquisition_config(config: &CamctlConfig, args: AcquireArgs) -> Result<AcquisitionConfig> {
    let mut acq = config.acquisition_config();
    if let Some(n) = args.nb_frames {
        acq.frame_count = FrameCount::new(n);
    }
    if let Some(exposure) = args.exposure {
        acq.exposure = seconds(exposure, "exposure")?;
    }
    if let Some(latency) = args.latency {
        acq.latency = seconds(latency, "latency")?;
    }
    if let Some(trigger) = args.trigger {
        acq.trigger_mode = trigger;
    }
    if args.roi.is_some() {
        acq.roi = args.roi;
    }
    if let Some(binning) = args.binning {
        acq.binning = binning;
    }
    if let Some(pixel_format) = args.pixel_format {
        acq.pixel_format = pixel_format;
    }
    if args.skip_failures {
        acq.failure_policy = FailurePolicy::Skip;
    }
    acq.validate()?;
    Ok(acq)
}

/// Forward one trigger per stdin line. Runs on a plain thread so a pending
/// read never holds up runtime shutdown.
fn spawn_stdin_triggers() -> TriggerReceiver {
    let (sender, receiver) = trigger_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            if line.is_err() || !sender.fire() {
                break;
            }
        }
    });
    receiver
}

async fn acquire(tree: &ParameterTree, config: AcquisitionConfig) -> Result<()> {
    let device = tree.device().name().to_string();
    println!("Acquiring {} frames on {}", config.frame_count, device);

    let (cancel, token) = cancel_pair();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupted, stopping acquisition");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "cannot listen for Ctrl+C"),
        }
    });

    let triggers = match config.trigger_mode {
        TriggerMode::Software => {
            eprintln!("Press Enter to trigger a frame, Ctrl+D to finish");
            spawn_stdin_triggers()
        }
        TriggerMode::Internal => TriggerReceiver::closed(),
    };

    let report = AcquisitionSession::new(tree, config)?
        .with_frame_observer(|record, _frame| println!("{}", render::frame_line(record)))
        .acquire(token, triggers)
        .await?;

    println!("{}", render::acquisition_summary(&report));
    if report.failed_frames > 0 && report.frames_grabbed == 0 {
        bail!("no frame was acquired");
    }
    Ok(())
}
