//! Process-wide tracing setup. `NYLON_LOG_LEVEL` (falling back to `info`)
//! feeds an `EnvFilter` the same way `EnvFilter::from_default_env()` would.

use tracing_subscriber::EnvFilter;

pub fn init(level_override: Option<&str>) {
    let level = level_override
        .map(str::to_string)
        .or_else(|| std::env::var("NYLON_LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string());

    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .json()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_level_falls_back_to_info_without_panicking() {
        let filter = EnvFilter::try_new("not-a-real-level").unwrap_or_else(|_| EnvFilter::new("info"));
        assert_eq!(filter.to_string(), "info");
    }
}
