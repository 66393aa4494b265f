// SPDX-License-Identifier: Apache-2.0

//! Structured logging setup built on `tracing` + `tracing-subscriber`
//! (env-filter, fmt).

use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber. `default_level` is used
/// when `RUST_LOG` is unset; callers pass the CLI `--log-level` flag's
/// value through it.
///
/// Returns an error if a subscriber was already installed, so this must
/// be called exactly once, at process startup.
pub fn init_tracing(default_level: &str) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_accepts_a_plain_level_name() {
        // Installing the global subscriber is process-global and would
        // collide with other tests in this binary, so this only checks
        // that building the filter from a plain level name doesn't panic.
        let _filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    }
}
