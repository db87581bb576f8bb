//! # webserver
//! src/lib.rs
//!
//! Servidor HTTP/1.1 embebible: un acceptor, una cola de despacho acotada con
//! política de sobrecarga, un pool fijo de workers y conexiones keep-alive.
//!
//! ## Arquitectura
//!
//! ```text
//! Acceptor → DispatchQueue → Worker → pipeline HTTP → Router → handler
//!                                         ↑______ keep-alive ______|
//! ```
//!
//! El servidor está dividido en módulos especializados:
//! - `config`: opciones, configuración validada y CLI del demo
//! - `http`: parsing de requests, lectura incremental y responses
//! - `router`: tabla de rutas `(método, path)` → handler
//! - `dispatch`: jobs de conexión y la cola acotada
//! - `server`: acceptor, workers, pipeline y ciclo de vida
//! - `metrics`: contadores atómicos y snapshots
//! - `logging`: sink de logs configurable sobre `tracing`
//! - `handlers`: rutas del binario demo
//!
//! ## Ejemplo de uso
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::thread;
//!
//! use webserver::config::ServerOptions;
//! use webserver::http::{Response, StatusCode};
//! use webserver::server::Server;
//!
//! let server = Arc::new(Server::new(ServerOptions {
//!     port: Some(8080),
//!     enable_keepalive: Some(true),
//!     ..ServerOptions::default()
//! })?);
//!
//! server.add_route("GET", "/", |_req| Ok(Response::text(StatusCode::Ok, "hi\n")), None)?;
//!
//! let shutdown = server.shutdown_handle();
//! thread::spawn(move || {
//!     thread::sleep(std::time::Duration::from_secs(10));
//!     shutdown.request();
//! });
//!
//! server.run()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod router;
pub mod server;

pub use config::{QueuePolicy, ServerConfig, ServerOptions};
pub use error::{ConfigError, HandlerError, RouteError, ServerError};
pub use http::{Request, Response, StatusCode};
pub use logging::{LogLevel, Logger};
pub use metrics::MetricsSnapshot;
pub use router::HandlerResult;
pub use server::{Server, ServerState, ShutdownHandle};
