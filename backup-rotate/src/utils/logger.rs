//! Logging configuration using tracing.
//!
//! Two layers share one filter: the console layer, and an ANSI-free copy of
//! every event written into the run report.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::report::CaptureBuffer;

/// Initialize logging with the specified level.
///
/// `RUST_LOG` takes precedence over `level`.
pub fn init(level: &str, capture: Option<CaptureBuffer>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let capture_layer = capture.map(|buffer| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(move || buffer.clone())
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(capture_layer)
        .try_init()?;

    Ok(())
}
