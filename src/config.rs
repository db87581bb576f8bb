//! # Configuración del Servidor
//! src/config.rs
//!
//! Dos capas:
//!
//! - [`ServerOptions`]: opciones de construcción, todas opcionales. Lo que no
//!   se especifica toma el valor por defecto.
//! - [`ServerConfig`]: configuración validada e inmutable que usa el motor.
//!
//! Además [`Cli`] define los argumentos del binario demo (con soporte de
//! variables de entorno) y los convierte en `ServerOptions`.
//!
//! ## Ejemplos de uso
//!
//! ### CLI
//! ```bash
//! ./webserver --port 8080 \
//!   --threads 4 \
//!   --queue 256 \
//!   --keepalive 1 \
//!   --queue-policy drop-oldest
//! ```
//!
//! ### Variables de entorno
//! ```bash
//! WS_PORT=8080 WS_THREADS=8 ./webserver
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;
use crate::logging::{LogCallback, LogLevel, Logger};

/// Puerto por defecto
pub const DEFAULT_PORT: u16 = 8080;

/// Capacidad por defecto de la cola de despacho
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Timeout de inactividad keep-alive por defecto (ms)
pub const DEFAULT_KEEPALIVE_TIMEOUT_MS: u64 = 15_000;

/// Máximo de requests por conexión keep-alive por defecto
pub const DEFAULT_MAX_KEEPALIVE_REQUESTS: u32 = 100;

/// Timeout por defecto para leer un request ya iniciado (ms)
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

const MAX_THREADS: u64 = 1024;
const MAX_QUEUE_CAPACITY: u64 = 1 << 30;
const MAX_BACKLOG: u64 = 65_535;
const MAX_KEEPALIVE_TIMEOUT_MS: u64 = 600_000;
const MAX_KEEPALIVE_REQUESTS: u64 = 1_000_000;
const MAX_REQUEST_TIMEOUT_MS: u64 = 600_000;

/// Política de sobrecarga cuando la cola de despacho está llena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum QueuePolicy {
    /// El acceptor espera a que se libere un lugar
    #[default]
    Block,
    /// La conexión nueva se cierra sin encolarse
    DropNew,
    /// Se descarta la conexión más antigua de la cola
    DropOldest,
}

impl QueuePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueuePolicy::Block => "block",
            QueuePolicy::DropNew => "drop-new",
            QueuePolicy::DropOldest => "drop-oldest",
        }
    }
}

impl std::fmt::Display for QueuePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opciones de construcción del servidor
///
/// Todos los campos son opcionales; `None` significa "usar el default".
#[derive(Clone, Default)]
pub struct ServerOptions {
    pub host: Option<IpAddr>,
    pub port: Option<u16>,
    pub nthreads: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub backlog: Option<u32>,
    pub enable_keepalive: Option<bool>,
    pub keepalive_timeout_ms: Option<u64>,
    pub max_keepalive_requests: Option<u32>,
    pub request_timeout_ms: Option<u64>,
    pub queue_policy: Option<QueuePolicy>,
    pub log_level: Option<LogLevel>,
    pub log_callback: Option<LogCallback>,
    pub log_to_stderr: Option<bool>,
}

/// Configuración validada e inmutable
#[derive(Debug, Clone)]
pub struct ServerConfig {
    host: IpAddr,
    port: u16,
    nthreads: usize,
    queue_capacity: usize,
    backlog: u32,
    enable_keepalive: bool,
    keepalive_timeout: Duration,
    max_keepalive_requests: u32,
    request_timeout: Duration,
    queue_policy: QueuePolicy,
    logger: Logger,
}

impl ServerConfig {
    /// Valida las opciones y construye la configuración final
    pub fn from_options(options: ServerOptions) -> Result<Self, ConfigError> {
        let nthreads = options.nthreads.unwrap_or_else(default_threads);
        check_range("nthreads", nthreads as u64, 1, MAX_THREADS)?;

        let queue_capacity = options.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY);
        check_range("queue_capacity", queue_capacity as u64, 1, MAX_QUEUE_CAPACITY)?;

        let backlog = options.backlog.unwrap_or_else(default_backlog);
        check_range("backlog", u64::from(backlog), 1, MAX_BACKLOG)?;

        let keepalive_timeout_ms = options
            .keepalive_timeout_ms
            .unwrap_or(DEFAULT_KEEPALIVE_TIMEOUT_MS);
        check_range(
            "keepalive_timeout_ms",
            keepalive_timeout_ms,
            1,
            MAX_KEEPALIVE_TIMEOUT_MS,
        )?;

        let max_keepalive_requests = options
            .max_keepalive_requests
            .unwrap_or(DEFAULT_MAX_KEEPALIVE_REQUESTS);
        check_range(
            "max_keepalive_requests",
            u64::from(max_keepalive_requests),
            1,
            MAX_KEEPALIVE_REQUESTS,
        )?;

        let request_timeout_ms = options
            .request_timeout_ms
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        check_range(
            "request_timeout_ms",
            request_timeout_ms,
            1,
            MAX_REQUEST_TIMEOUT_MS,
        )?;

        let logger = Logger::new(
            options.log_callback,
            options.log_level.unwrap_or(LogLevel::Info),
            options.log_to_stderr.unwrap_or(true),
        );

        Ok(Self {
            host: options.host.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            port: options.port.unwrap_or(DEFAULT_PORT),
            nthreads,
            queue_capacity,
            backlog,
            enable_keepalive: options.enable_keepalive.unwrap_or(false),
            keepalive_timeout: Duration::from_millis(keepalive_timeout_ms),
            max_keepalive_requests,
            request_timeout: Duration::from_millis(request_timeout_ms),
            queue_policy: options.queue_policy.unwrap_or_default(),
            logger,
        })
    }

    /// Dirección completa para bind (host:port)
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn nthreads(&self) -> usize {
        self.nthreads
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn backlog(&self) -> u32 {
        self.backlog
    }

    pub fn keepalive_enabled(&self) -> bool {
        self.enable_keepalive
    }

    pub fn keepalive_timeout(&self) -> Duration {
        self.keepalive_timeout
    }

    pub fn max_keepalive_requests(&self) -> u32 {
        self.max_keepalive_requests
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn queue_policy(&self) -> QueuePolicy {
        self.queue_policy
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        // Las opciones por defecto siempre están dentro de rango
        match Self::from_options(ServerOptions::default()) {
            Ok(config) => config,
            Err(e) => unreachable!("default options rejected: {e}"),
        }
    }
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            min,
            max,
            value,
        });
    }
    Ok(())
}

/// Número de cores disponibles, mínimo 2
pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .clamp(2, MAX_THREADS as usize)
}

/// Backlog máximo de la plataforma
pub fn default_backlog() -> u32 {
    (libc::SOMAXCONN as u32).clamp(1, MAX_BACKLOG as u32)
}

fn parse_flag(s: &str) -> Result<bool, String> {
    match s {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(format!("expected 0 or 1, got {s:?}")),
    }
}

/// Argumentos de línea de comandos del binario demo
#[derive(Debug, Clone, Parser)]
#[command(name = "webserver")]
#[command(about = "Servidor HTTP/1.1 con pool de workers, cola acotada y keep-alive")]
#[command(version)]
pub struct Cli {
    /// Puerto en el que escucha el servidor
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "WS_PORT")]
    pub port: u16,

    /// Host/IP en el que escucha
    #[arg(long, default_value = "0.0.0.0", env = "WS_HOST")]
    pub host: IpAddr,

    /// Número de workers (por defecto: cores, mínimo 2)
    #[arg(short, long, env = "WS_THREADS",
          value_parser = clap::value_parser!(u64).range(1..=MAX_THREADS))]
    pub threads: Option<u64>,

    /// Capacidad de la cola de despacho
    #[arg(short, long = "queue", env = "WS_QUEUE",
          value_parser = clap::value_parser!(u64).range(1..=MAX_QUEUE_CAPACITY))]
    pub queue: Option<u64>,

    /// Backlog de listen (por defecto: máximo de la plataforma)
    #[arg(short, long, env = "WS_BACKLOG",
          value_parser = clap::value_parser!(u32).range(1..=MAX_BACKLOG as i64))]
    pub backlog: Option<u32>,

    /// Habilita keep-alive (0 o 1)
    #[arg(long, default_value = "0", env = "WS_KEEPALIVE", value_parser = parse_flag,
          action = clap::ArgAction::Set)]
    pub keepalive: bool,

    /// Timeout de inactividad keep-alive en milisegundos
    #[arg(long = "ka-timeout", default_value_t = DEFAULT_KEEPALIVE_TIMEOUT_MS, env = "WS_KA_TIMEOUT",
          value_parser = clap::value_parser!(u64).range(1..=MAX_KEEPALIVE_TIMEOUT_MS))]
    pub ka_timeout: u64,

    /// Máximo de requests por conexión keep-alive
    #[arg(long = "ka-max-req", default_value_t = DEFAULT_MAX_KEEPALIVE_REQUESTS, env = "WS_KA_MAX_REQ",
          value_parser = clap::value_parser!(u32).range(1..=MAX_KEEPALIVE_REQUESTS as i64))]
    pub ka_max_req: u32,

    /// Política cuando la cola está llena
    #[arg(long = "queue-policy", value_enum, default_value_t = QueuePolicy::Block, env = "WS_QUEUE_POLICY")]
    pub queue_policy: QueuePolicy,

    /// Nivel mínimo de log
    #[arg(long = "log-level", value_enum, default_value_t = LogLevel::Info, env = "WS_LOG_LEVEL")]
    pub log_level: LogLevel,
}

impl Cli {
    /// Convierte los argumentos en opciones del servidor
    pub fn to_options(&self) -> ServerOptions {
        ServerOptions {
            host: Some(self.host),
            port: Some(self.port),
            nthreads: self.threads.map(|t| t as usize),
            queue_capacity: self.queue.map(|q| q as usize),
            backlog: self.backlog,
            enable_keepalive: Some(self.keepalive),
            keepalive_timeout_ms: Some(self.ka_timeout),
            max_keepalive_requests: Some(self.ka_max_req),
            request_timeout_ms: None,
            queue_policy: Some(self.queue_policy),
            log_level: Some(self.log_level),
            log_callback: None,
            log_to_stderr: Some(true),
        }
    }

    /// Imprime un resumen de la configuración efectiva
    pub fn print_summary(config: &ServerConfig) {
        println!("╔══════════════════════════════════════════════════════════════╗");
        println!("║               webserver HTTP/1.1 Configuration               ║");
        println!("╚══════════════════════════════════════════════════════════════╝");
        println!();
        println!("🌐 Network:");
        println!("   Address:      {}", config.address());
        println!("   Backlog:      {}", config.backlog());
        println!();
        println!("👷 Workers & Queue:");
        println!("   Workers:      {}", config.nthreads());
        println!("   Queue cap:    {}", config.queue_capacity());
        println!("   Policy:       {}", config.queue_policy());
        println!();
        println!("🔁 Keep-alive:");
        if config.keepalive_enabled() {
            println!("   Timeout:      {} ms", config.keepalive_timeout().as_millis());
            println!("   Max requests: {}", config.max_keepalive_requests());
        } else {
            println!("   disabled");
        }
        println!();
        println!("═══════════════════════════════════════════════════════════════");
        println!();
    }
}
