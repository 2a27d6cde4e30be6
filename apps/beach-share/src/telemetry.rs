pub mod logging {
    use std::fmt;
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use std::sync::OnceLock;

    use clap::ValueEnum;
    use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    /// Full `EnvFilter` directive string; replaces everything derived from
    /// the log level.
    pub const FILTER_ENV: &str = "BEACH_SHARE_LOG_FILTER";
    /// Set to a non-zero value to keep ICE/DTLS/SCTP traces at `trace`.
    pub const TRACE_DEPS_ENV: &str = "BEACH_SHARE_TRACE_DEPS";

    // Dependency targets that drown out negotiation logs at trace level.
    const NOISY_TARGETS: &[&str] = &[
        "webrtc_ice",
        "webrtc_dtls",
        "webrtc_sctp",
        "webrtc_srtp",
        "webrtc_mdns",
        "webrtc::peer_connection",
        "tokio_tungstenite",
        "tungstenite",
        "mio",
    ];

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl LogLevel {
        pub fn as_str(self) -> &'static str {
            match self {
                LogLevel::Error => "error",
                LogLevel::Warn => "warn",
                LogLevel::Info => "info",
                LogLevel::Debug => "debug",
                LogLevel::Trace => "trace",
            }
        }
    }

    impl fmt::Display for LogLevel {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("cannot open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("logger already installed: {0}")]
        Configure(String),
    }

    static WRITER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Install the process-wide subscriber. Only the first call has an effect.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if WRITER_GUARD.get().is_some() {
            return Ok(());
        }
        let (writer, guard) = open_writer(config)?;
        let directives = match std::env::var(FILTER_ENV) {
            Ok(custom) => custom,
            Err(_) => level_directives(config.level, trace_deps_requested()),
        };

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(config.file.is_none())
            .with_target(config.level >= LogLevel::Debug)
            .with_thread_names(config.level == LogLevel::Trace);
        tracing_subscriber::registry()
            .with(EnvFilter::new(&directives))
            .with(layer)
            .try_init()
            .map_err(|err| InitError::Configure(err.to_string()))?;

        let _ = WRITER_GUARD.set(guard);
        tracing::debug!(filter = %directives, "logging initialised");
        Ok(())
    }

    fn open_writer(config: &LogConfig) -> Result<(NonBlocking, WorkerGuard), InitError> {
        let Some(path) = &config.file else {
            return Ok(tracing_appender::non_blocking(std::io::stderr()));
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| InitError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(tracing_appender::non_blocking(file))
    }

    fn trace_deps_requested() -> bool {
        std::env::var(TRACE_DEPS_ENV)
            .map(|value| !value.is_empty() && value != "0")
            .unwrap_or(false)
    }

    /// Directives for `level`. Debug and trace only raise this crate and the
    /// `webrtc` log target; other crates stay at `info`.
    pub(crate) fn level_directives(level: LogLevel, trace_deps: bool) -> String {
        match level {
            LogLevel::Error | LogLevel::Warn | LogLevel::Info => level.as_str().to_owned(),
            LogLevel::Debug | LogLevel::Trace => {
                let mut directives = format!("info,beach_share={level},webrtc={level}");
                if level == LogLevel::Trace && !trace_deps {
                    for target in NOISY_TARGETS {
                        directives.push_str(&format!(",{target}=info"));
                    }
                }
                directives
            }
        }
    }

}
