// Error tracking with Sentry
use std::env;
use tracing::info;

#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub sentry_dsn: Option<String>,
    pub environment: String,
    pub traces_sample_rate: f32,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            sentry_dsn: None,
            environment: "development".to_string(),
            traces_sample_rate: 0.0,
        }
    }
}

impl MonitoringConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.sentry_dsn = env::var("SENTRY_DSN").ok().filter(|dsn| !dsn.is_empty());

        if let Ok(environment) = env::var("SENTRY_ENVIRONMENT") {
            config.environment = environment;
        }

        if let Ok(rate) = env::var("SENTRY_TRACES_SAMPLE_RATE") {
            if let Ok(val) = rate.parse::<f32>() {
                config.traces_sample_rate = val.clamp(0.0, 1.0);
            }
        }

        config
    }
}

/// Initialise Sentry when a DSN is configured.
///
/// The returned guard must be held for the lifetime of the process; dropping
/// it flushes pending events.
pub fn init_sentry(config: &MonitoringConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_deref()?;

    let guard = sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            traces_sample_rate: config.traces_sample_rate,
            ..Default::default()
        },
    ));

    info!(environment = %config.environment, "Sentry error tracking initialized");
    Some(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MonitoringConfig::default();
        assert!(config.sentry_dsn.is_none());
        assert_eq!(config.environment, "development");
    }

    #[test]
    fn test_no_dsn_skips_init() {
        assert!(init_sentry(&MonitoringConfig::default()).is_none());
    }
}
