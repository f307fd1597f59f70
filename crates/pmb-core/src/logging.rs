//! Process-wide tracing setup shared by every `pmb` command

use tracing_subscriber::EnvFilter;

use crate::error::{BusError, BusResult};

/// How chatty the subscriber should be and in which format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Number of `-v` flags
    pub verbosity: u8,
    /// Only warnings and errors
    pub quiet: bool,
    /// One JSON object per line instead of human-readable output
    pub json: bool,
}

impl LogOptions {
    /// Default filter directive when `RUST_LOG` is not set
    pub fn level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// verbosity-derived level.
pub fn init_logging(opts: LogOptions) -> BusResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(opts.level()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = if opts.json {
        builder.json().try_init()
    } else {
        builder.with_target(false).try_init()
    };

    result.map_err(|e| BusError::Config(format!("logging already initialised: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        assert_eq!(LogOptions::default().level(), "info");
        assert_eq!(LogOptions { verbosity: 1, ..Default::default() }.level(), "debug");
        assert_eq!(LogOptions { verbosity: 4, ..Default::default() }.level(), "trace");
    }

    #[test]
    fn test_quiet_wins_over_verbose() {
        let opts = LogOptions {
            verbosity: 2,
            quiet: true,
            json: false,
        };
        assert_eq!(opts.level(), "warn");
    }
}
