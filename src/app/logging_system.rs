use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("Failed to install global tracing subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Builds the process-wide tracing filter and installs the subscriber.
#[derive(Debug, Clone)]
pub struct LoggingSystem {
    default_level: &'static str,
    directives: Vec<String>,
}

impl LoggingSystem {
    pub fn new(debug: bool) -> Self {
        Self {
            default_level: if debug { "debug" } else { "info" },
            directives: Vec::new(),
        }
    }

    pub fn add_directive(&mut self, directive: impl Into<String>) {
        self.directives.push(directive.into());
    }

    /// HTTP and TLS internals only report warnings.
    pub fn add_default_directives(&mut self) {
        for target in ["hyper", "hyper_util", "reqwest", "rustls", "h2"] {
            self.add_directive(format!("{target}=warn"));
        }
    }

    pub fn build_filter_string(&self) -> String {
        std::iter::once(self.default_level.to_string())
            .chain(self.directives.iter().cloned())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// `RUST_LOG` replaces the built filter when set.
    pub fn filter(&self) -> Result<EnvFilter, LoggingError> {
        let filter = std::env::var(EnvFilter::DEFAULT_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| self.build_filter_string());

        EnvFilter::try_new(&filter).map_err(|source| LoggingError::InvalidFilter { filter, source })
    }

    /// Logs go to stderr so query output on stdout stays clean.
    pub fn initialize(&self) -> Result<(), LoggingError> {
        tracing_subscriber::registry()
            .with(self.filter()?)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_level(true)
                    .compact(),
            )
            .try_init()?;
        Ok(())
    }
}

/// Installs logging for the binary; a second call keeps the first subscriber.
pub fn setup_logging(debug: bool) {
    let mut logging = LoggingSystem::new(debug);
    logging.add_default_directives();
    if let Err(e) = logging.initialize() {
        eprintln!("Warning: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_string_starts_with_default_level() {
        let mut logging = LoggingSystem::new(false);
        logging.add_default_directives();
        let filter = logging.build_filter_string();
        assert!(filter.starts_with("info,"));
        assert!(filter.contains("reqwest=warn"));
        assert!(filter.contains("rustls=warn"));
    }

    #[test]
    fn debug_raises_default_level() {
        let logging = LoggingSystem::new(true);
        assert_eq!(logging.build_filter_string(), "debug");
    }

    #[test]
    fn custom_directives_are_appended() {
        let mut logging = LoggingSystem::new(false);
        logging.add_directive("devo_sdk::sender=trace");
        assert_eq!(logging.build_filter_string(), "info,devo_sdk::sender=trace");
    }
}
