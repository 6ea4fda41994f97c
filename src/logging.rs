//! Tracing setup.
//!
//! The library itself only emits `tracing` events; hosts call [`init`] once
//! at startup (or install their own subscriber).

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber. `RUST_LOG` takes precedence over
/// `default_filter`. Returns false if a global subscriber was already set.
pub fn init(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        init("murmur_core=debug");
        assert!(!init("murmur_core=debug"));
    }
}
