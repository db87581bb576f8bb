//! # Logging
//! src/logging.rs
//!
//! Sink de logs configurable del servidor. Un mensaje se descarta si su nivel
//! es más verboso que el mínimo configurado; si pasa el filtro va al callback
//! del usuario o, si no hay callback y está habilitado el fallback, se emite
//! como evento de `tracing` con target `webserver`.

use std::fmt;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

/// Nivel de log, ordenado de menos a más verboso
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback de log provisto por la aplicación
pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Sink de logs: callback opcional + nivel mínimo + fallback a stderr
#[derive(Clone)]
pub struct Logger {
    callback: Option<LogCallback>,
    min_level: LogLevel,
    to_stderr: bool,
}

impl Logger {
    pub fn new(callback: Option<LogCallback>, min_level: LogLevel, to_stderr: bool) -> Self {
        Self {
            callback,
            min_level,
            to_stderr,
        }
    }

    /// Logger que descarta todo
    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error, false)
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    /// Indica si un mensaje de este nivel llegaría a algún destino
    pub fn enabled(&self, level: LogLevel) -> bool {
        level <= self.min_level && (self.callback.is_some() || self.to_stderr)
    }

    /// Emite un mensaje; el formateo solo ocurre si el nivel está habilitado
    pub fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }

        if let Some(callback) = &self.callback {
            callback(level, &args.to_string());
            return;
        }

        match level {
            LogLevel::Error => tracing::error!(target: "webserver", "{}", args),
            LogLevel::Warn => tracing::warn!(target: "webserver", "{}", args),
            LogLevel::Info => tracing::info!(target: "webserver", "{}", args),
            LogLevel::Debug => tracing::debug!(target: "webserver", "{}", args),
        }
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Error, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Warn, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Info, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Debug, args);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("callback", &self.callback.as_ref().map(|_| "<fn>"))
            .field("min_level", &self.min_level)
            .field("to_stderr", &self.to_stderr)
            .finish()
    }
}

/// Inicializa un subscriber de `tracing` que escribe a stderr
///
/// `RUST_LOG` tiene prioridad sobre `level`. Si ya había un subscriber global
/// instalado, no hace nada.
pub fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("webserver={}", level.as_str())));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .with_target(false)
        .try_init();
}
