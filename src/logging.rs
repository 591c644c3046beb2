//! Process-wide tracing setup for the binary and for embedders that want the
//! same output format.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_FORMAT_ENV: &str = "LINKQUEUE_LOG_FORMAT";
const DEFAULT_DIRECTIVE: &str = "linkqueue=info";

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        Self::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref())
    }

    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Installs the global subscriber once. `RUST_LOG` overrides the default
/// `linkqueue=info` filter.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
        let format = LogFormat::from_env();

        let layer = match format {
            LogFormat::Json => fmt::layer().with_target(true).json().with_filter(filter).boxed(),
            LogFormat::Pretty => fmt::layer().with_target(true).with_filter(filter).boxed(),
        };

        // an embedding application may already own the global subscriber
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("global tracing subscriber already set, keeping it");
            return;
        }
        tracing::debug!(?format, "logging initialized");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_format_is_opt_in() {
        assert_eq!(LogFormat::parse(None), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(Some("text")), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(Some(" JSON ")), LogFormat::Json);
    }

    #[test]
    fn init_is_idempotent() {
        init_logging();
        init_logging();
    }
}
