use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "water_meter_bridge=info";

/// Installs the global fmt subscriber. `RUST_LOG` replaces the crate's
/// default `info` level when set.
pub fn init_tracing() {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(rust_log.as_deref()))
        .with_target(false)
        .init();
}

/// Filter from `RUST_LOG`-style directives, falling back to the default when
/// they are missing, blank or unparseable.
fn env_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_default_level_is_info() {
        assert_eq!(env_filter(None).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(env_filter(Some("  ")).max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn test_rust_log_can_enable_debug_for_the_crate() {
        let filter = env_filter(Some("water_meter_bridge=debug"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn test_invalid_rust_log_falls_back_to_default() {
        let filter = env_filter(Some("water_meter_bridge=loud"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO));
    }
}
