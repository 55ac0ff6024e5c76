//! Tracing setup shared by the KudoMan binaries.

use tracing_subscriber::EnvFilter;

/// Filter used when nothing is configured.
const DEFAULT_LEVEL: &str = "info";

/// Maps a `LOGLEVEL` value to a tracing level directive.
///
/// Accepts the usual level names in any case, plus the `warning`,
/// `critical` and `notset` spellings older configurations use.
#[must_use]
pub fn legacy_level(value: &str) -> Option<&'static str> {
    match value.trim().to_ascii_lowercase().as_str() {
        "trace" | "notset" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" | "critical" | "fatal" => Some("error"),
        _ => None,
    }
}

/// Initializes the global tracing subscriber.
///
/// `RUST_LOG` wins if set; otherwise `LOGLEVEL` is honoured; otherwise `info`.
/// Output goes to stderr so command output on stdout stays clean.
/// Must be called at most once per process.
pub fn init_tracing() {
    let mut rejected = None;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        match std::env::var("LOGLEVEL").ok().filter(|v| !v.trim().is_empty()) {
            Some(value) => match legacy_level(&value) {
                Some(level) => EnvFilter::new(level),
                None => {
                    rejected = Some(value);
                    EnvFilter::new(DEFAULT_LEVEL)
                }
            },
            None => EnvFilter::new(DEFAULT_LEVEL),
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(value) = rejected {
        tracing::error!(value, "Unknown LOGLEVEL, falling back to info");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_level_names() {
        assert_eq!(legacy_level("DEBUG"), Some("debug"));
        assert_eq!(legacy_level("Info"), Some("info"));
        assert_eq!(legacy_level("WARNING"), Some("warn"));
        assert_eq!(legacy_level("critical"), Some("error"));
        assert_eq!(legacy_level(" error "), Some("error"));
        assert_eq!(legacy_level("NOTSET"), Some("trace"));
    }

    #[test]
    fn test_legacy_level_unknown() {
        assert_eq!(legacy_level("verbose"), None);
        assert_eq!(legacy_level(""), None);
    }
}
