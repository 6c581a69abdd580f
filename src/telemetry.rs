// Tracing subscriber setup for hosts embedding the content layer

use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{LogFormat, LoggingSettings};
use crate::error::{ContentError, ContentResult};

// `RUST_LOG` wins over the configured filter when set
pub fn init(logging: &LoggingSettings) -> ContentResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.filter))
        .map_err(|e| ContentError::Configuration(format!("invalid log filter: {e}")))?;

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| {
            ContentError::Configuration(format!("failed to install tracing subscriber: {e}"))
        })
}
