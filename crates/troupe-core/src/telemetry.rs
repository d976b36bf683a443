use tracing_subscriber::EnvFilter;

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Human-readable single-line output.
    #[default]
    Pretty,
    /// One JSON object per event, for log shippers.
    Json,
}

/// Install a global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG` and falls back to `default_filter`
/// (e.g. `"info"` or `"troupe_orchestrator=debug"`). Returns `false` when a
/// global subscriber was already installed, so tests and host applications
/// may call this more than once.
pub fn init_tracing(format: TracingFormat, default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match format {
        TracingFormat::Pretty => builder.try_init(),
        TracingFormat::Json => builder.json().try_init(),
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        init_tracing(TracingFormat::Pretty, "warn");
        assert!(!init_tracing(TracingFormat::Json, "warn"));
    }
}
