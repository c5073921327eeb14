use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use uvc_hub::capability::Resolution;
use uvc_hub::config::ConfigStore;
use uvc_hub::coordinator::{Consumer, DeviceCoordinator};
use uvc_hub::device::{Device, DeviceDescriptor, PID_THETA_V, VID_RICOH};
use uvc_hub::engine::sim::{SimulatedEngine, THETA_REPORT};
use uvc_hub::engine::SinkHandle;
use uvc_hub::permission::{ScriptedPermissions, ScriptedResponse};
use uvc_hub::session::AudioReader;
use uvc_hub::UvcError;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// uvc-hub command line arguments
#[derive(Parser, Debug)]
#[command(name = "uvc-hub")]
#[command(version, about = "Hot-plug coordinator for USB capture devices", long_about = None)]
struct CliArgs {
    /// Configuration file (created with defaults when missing)
    #[arg(short = 'c', long, value_name = "FILE", default_value = "uvc-hub.json")]
    config: PathBuf,

    /// Log level
    #[arg(short = 'l', long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v verbose, -vv debug, -vvv trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// How long to keep the simulated camera streaming
    #[arg(short = 'd', long, value_name = "SECONDS", default_value_t = 3)]
    duration_secs: u64,
}

/// Consumer that logs what it receives
struct LogConsumer;

#[async_trait]
impl Consumer for LogConsumer {
    fn name(&self) -> &str {
        "log"
    }

    async fn on_attach(&self, device: &Device) -> bool {
        tracing::info!("Accepting {}", device);
        true
    }

    fn preferred_size(&self, device: &Device) -> Option<Resolution> {
        device.is_panoramic().then_some(Resolution::EQUIRECT_4K)
    }

    async fn on_stream_ready(&self, device: &Device, sink: SinkHandle) {
        let target = sink.target();
        tracing::info!(
            "Stream ready for {}: {} {}",
            device,
            target.encoding,
            target.resolution()
        );
    }

    async fn on_stream_stopped(&self, device: &Device) {
        tracing::info!("Stream stopped for {}", device);
    }

    fn wants_audio(&self, device: &Device) -> bool {
        device.supports_audio()
    }

    async fn on_audio_ready(&self, device: &Device, reader: AudioReader) {
        let format = reader.format();
        tracing::info!(
            "Audio ready for {}: {} ch @ {} Hz",
            device,
            format.channels,
            format.sample_rate
        );
    }

    async fn on_error(&self, device: &Device, error: &UvcError) {
        tracing::warn!("{}: {}", device, error);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting uvc-hub v{}", env!("CARGO_PKG_VERSION"));

    let config = ConfigStore::load(&args.config).await?;
    tracing::info!("Configuration loaded from {}", config.path().display());

    let engine = Arc::new(SimulatedEngine::with_report(THETA_REPORT));
    let permissions = Arc::new(ScriptedPermissions::new(ScriptedResponse::Grant));

    let coordinator = DeviceCoordinator::new(engine, permissions, config)
        .with_consumer(Arc::new(LogConsumer));

    let mut events = coordinator.events().subscribe();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => tracing::info!("event: {}", json),
                Err(e) => tracing::warn!("Failed to serialize event: {}", e),
            }
        }
    });

    let (handle, coordinator_task) = coordinator.spawn();

    handle.attach(DeviceDescriptor {
        id: 1,
        vendor_id: VID_RICOH,
        product_id: PID_THETA_V,
        device_class: 0xEF,
        device_subclass: 0x02,
        device_protocol: 0x01,
        name: "RICOH THETA V".to_string(),
        audio_interface: true,
    });

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration_secs)) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    for status in handle.devices().await? {
        tracing::info!("{}", serde_json::to_string(&status)?);
    }

    handle.detach(1);
    handle.shutdown().await?;
    coordinator_task.await?;
    event_task.abort();

    tracing::info!("Bye");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "uvc_hub=error",
        LogLevel::Warn => "uvc_hub=warn",
        LogLevel::Info => "uvc_hub=info",
        LogLevel::Verbose => "uvc_hub=debug,uvc_hub::session=info",
        LogLevel::Debug => "uvc_hub=debug",
        LogLevel::Trace => "uvc_hub=trace",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
