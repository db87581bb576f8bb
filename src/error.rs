//! # Errores del Servidor
//! src/error.rs
//!
//! Taxonomía de errores de la librería:
//!
//! - [`ConfigError`]: opciones inválidas, rechazadas al construir el servidor.
//! - [`RouteError`]: registro de rutas inválido o tardío.
//! - [`ServerError`]: fallos de `run` (bind/listen, threads, estado, faltas internas).
//! - [`HandlerError`]: faltas reportadas por un handler (se mapean a 500).
//!
//! Los errores de protocolo por conexión viven en [`crate::http::ParseError`]
//! y nunca salen del worker.

use std::io;
use std::net::SocketAddr;

/// Error de validación de la configuración
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Campo numérico fuera de rango
    #[error("{field} must be in {min}..={max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: u64,
        max: u64,
        value: u64,
    },
}

/// Error al registrar una ruta
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouteError {
    /// Ya existe un handler para ese (método, path); gana el primero
    #[error("route already registered: {method} {path}")]
    Duplicate { method: String, path: String },

    /// El método no es un token HTTP válido
    #[error("invalid method: {0:?}")]
    InvalidMethod(String),

    /// El path no empieza con '/' o contiene espacios/query
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// Las rutas se congelan cuando el servidor arranca
    #[error("routes cannot be modified once the server has started")]
    ServerStarted,
}

/// Error devuelto por `Server::run`
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// No se pudo hacer bind al puerto
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Falló listen(2) o la configuración del socket de escucha
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// No se pudo crear un thread del pool o el acceptor
    #[error("failed to spawn {what} thread: {source}")]
    Spawn {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    /// `run` llamado sobre un servidor que ya arrancó o terminó
    #[error("server is not in the Created state (current: {0})")]
    InvalidState(&'static str),

    /// Violación de invariante interna (un thread del motor hizo panic)
    #[error("internal fault: {0}")]
    Internal(String),
}

impl ServerError {
    /// Código de salida de proceso para el binario demo
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// Distingue fallos de arranque (bind/listen) del resto
    pub fn is_startup_failure(&self) -> bool {
        matches!(self, ServerError::Bind { .. } | ServerError::Listen { .. })
    }
}

/// Falta reportada por un handler
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Error de I/O (por ejemplo al escribir con `send_response`)
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Falta genérica con mensaje
    #[error("{0}")]
    Message(String),

    /// El handler ya había enviado su respuesta
    #[error("response already sent for this request")]
    AlreadySent,
}

impl HandlerError {
    /// Crea una falta con mensaje libre
    pub fn msg(message: impl Into<String>) -> Self {
        HandlerError::Message(message.into())
    }
}
