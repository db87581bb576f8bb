//! # Módulo del Servidor HTTP
//! src/server/mod.rs
//!
//! Motor de concurrencia del servidor:
//!
//! 1. `acceptor`: un thread que acepta conexiones y las encola
//! 2. `worker`: N threads que toman conexiones de la cola
//! 3. `connection`: el pipeline HTTP/keep-alive de cada conexión
//! 4. `lifecycle`: el [`Server`] y su máquina de estados
//! 5. `shutdown`: el flag de apagado compartido
//! 6. `net`: socket de escucha con backlog y espera con `poll`

mod acceptor;
pub mod connection;
pub mod lifecycle;
mod net;
pub mod shutdown;
mod worker;

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::metrics::MetricsCollector;
use crate::router::Router;

// Re-exportar para facilitar el uso
pub use connection::CloseReason;
pub use lifecycle::{Server, ServerState};
pub use shutdown::ShutdownHandle;

/// Estado compartido (de solo lectura) entre los workers de un servidor
pub(crate) struct ServerContext {
    pub(crate) config: ServerConfig,
    pub(crate) routes: Router,
    pub(crate) metrics: Arc<MetricsCollector>,
    pub(crate) shutdown: ShutdownHandle,
}
