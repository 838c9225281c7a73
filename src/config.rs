//! Driver configuration. `start_timeout` is the one ambient (environment)
//! input in this crate; it is read once here and stored, never consulted
//! again at call sites — the Design Notes rule from `spec.md` §9.

use std::env;
use std::time::Duration;

use structopt::StructOpt;

pub const START_TIMEOUT_ENV: &str = "HOROVOD_ELASTIC_START_TIMEOUT";
const DEFAULT_START_TIMEOUT_SECS: u64 = 600;

/// Frequency of the host-discovery poll.
pub const DISCOVER_HOSTS_FREQUENCY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct Config {
    pub min_np: u32,
    pub max_np: Option<u32>,
    pub start_timeout: Duration,
    pub verbose: u8,
}

impl Config {
    /// Builds a `Config`, reading `HOROVOD_ELASTIC_START_TIMEOUT` once.
    pub fn new(min_np: u32, max_np: Option<u32>, verbose: u8) -> Self {
        init_logging(verbose);
        Config {
            min_np,
            max_np,
            start_timeout: read_start_timeout(),
            verbose,
        }
    }

    /// Builds a `Config` with an explicit start timeout, bypassing the
    /// environment lookup. Used by tests and by callers that already
    /// resolved their own timeout policy.
    pub fn with_start_timeout(min_np: u32, max_np: Option<u32>, verbose: u8, start_timeout: Duration) -> Self {
        init_logging(verbose);
        Config {
            min_np,
            max_np,
            start_timeout,
            verbose,
        }
    }
}

fn read_start_timeout() -> Duration {
    env::var(START_TIMEOUT_ENV)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(DEFAULT_START_TIMEOUT_SECS))
}

/// Initializes `env_logger` for the `verbose` ladder (`0`→warn, `1`→info,
/// `2`→debug), unless `RUST_LOG` is already set. Idempotent: later calls
/// after the first successful one are no-ops, so every `Config` constructor
/// can call this unconditionally.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .try_init();
}

/// Standalone CLI surface for embedding the driver in a launcher binary or a
/// local demo, mirroring the teacher's `xputils::Args`. Not wired to any
/// process-spawning logic here; command-line parsing for the enclosing
/// launcher is out of scope (`spec.md` §1).
#[derive(Debug, StructOpt)]
#[structopt(name = "elastic-driver")]
pub struct CliArgs {
    /// Minimum number of worker slots required to start or continue.
    #[structopt(long)]
    pub min_np: u32,

    /// Maximum number of worker slots; unbounded above if omitted.
    #[structopt(long)]
    pub max_np: Option<u32>,

    /// Verbosity: pass once for info-level logging, twice for debug.
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: u8,
}

impl CliArgs {
    pub fn into_config(self) -> Config {
        Config::new(self.min_np, self.max_np, self.verbose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_start_timeout_is_600s_absent_env() {
        env::remove_var(START_TIMEOUT_ENV);
        assert_eq!(read_start_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn start_timeout_honors_env_override() {
        env::set_var(START_TIMEOUT_ENV, "42");
        assert_eq!(read_start_timeout(), Duration::from_secs(42));
        env::remove_var(START_TIMEOUT_ENV);
    }
}
