use tracing_subscriber::{fmt, EnvFilter};

use crate::types::{KvError, Result};

/// Installs a global `fmt` subscriber filtered by `level`.
///
/// `level` accepts any `EnvFilter` directive, e.g. `info` or
/// `blobkv::storage=trace,warn`.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .map_err(|err| KvError::Config(format!("invalid log level: {err}")))?;
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| KvError::Config("logging already initialized".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_directives() {
        assert!(matches!(
            init_logging("blobkv=notalevel"),
            Err(KvError::Config(_))
        ));
    }
}
