//! Log subscriber setup for applications built on devstack.

use tracing_subscriber::EnvFilter;

/// Errors encountered while installing the log subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

/// The environment variable holding the log filter for `app_name`, e.g.
/// `MY_APP_LOG` for `my-app`.
pub fn log_env_var(app_name: &str) -> String {
    let mut var: String = app_name
        .chars()
        .map(|c| match c {
            '-' | '.' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect();
    var.push_str("_LOG");
    var
}

/// Install a compact stderr subscriber filtered by `<APP>_LOG`, falling back
/// to `default_level`.
///
/// Fails, rather than panicking, if a global subscriber is already set.
pub fn init_logging(app_name: &str, default_level: &str) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_env(log_env_var(app_name))
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| LoggingError::Install(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_env_var() {
        assert_eq!(log_env_var("devstack"), "DEVSTACK_LOG");
        assert_eq!(log_env_var("my-app"), "MY_APP_LOG");
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init_logging("devstack-test", "warn");
        assert!(matches!(
            init_logging("devstack-test", "warn"),
            Err(LoggingError::Install(_))
        ));
    }
}
