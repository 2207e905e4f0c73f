/// Wyoming wake-word service library
///
/// This library runs configurable wake-word detectors behind the Wyoming protocol:
/// per-connection sessions, a lazily filled detector cache, audio normalization to
/// 16kHz mono, and capability description.

pub mod audio;
pub mod cache;
pub mod config;
pub mod energy;
pub mod engine;
pub mod frame_buffer;
pub mod info;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// Re-export main types
pub use audio::{AudioChunk, AudioError, AudioFormat, AudioNormalizer, AudioSample, TARGET_SAMPLE_RATE};
pub use cache::DetectorCache;
pub use config::{ConfigError, ConfigProvider, HotwordDefinition, ServiceConfig};
pub use energy::{EnergyConfig, EnergyDetector};
pub use engine::{EngineFactory, HotwordEngine};
pub use info::{CapabilityResponder, Info, WakeModel, WakeProgram};
pub use protocol::{Event, InboundEvent, OutboundEvent, ProtocolError};
pub use registry::{DetectorError, DetectorRegistry};
pub use server::{handle_connection, ServerError, ServerUri, WakeWordServer};
pub use session::{Session, SessionError, SessionState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Layout of log lines on stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
    Json,
}

/// Initialize logging
///
/// `RUST_LOG` wins when set; otherwise the crate logs at info, or debug when asked.
pub fn init_logging(debug: bool, format: LogFormat) {
    let default_directive = if debug {
        "wyoming_wakeword=debug"
    } else {
        "wyoming_wakeword=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_directive.into());

    match format {
        LogFormat::Full => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    }
}
