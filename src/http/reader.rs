//! # Lectura incremental de Requests
//! src/http/reader.rs
//!
//! Un [`RequestReader`] acumula bytes de una conexión hasta tener el head
//! completo (terminado en `\r\n\r\n`) y luego el body declarado. Lo que llega
//! de más queda en el buffer para el siguiente request (pipelining).
//!
//! Las esperas se hacen en tramos cortos para poder notar un pedido de
//! apagado mientras la conexión está inactiva.

use std::io::{self, Read};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use crate::server::ShutdownHandle;

/// Tamaño máximo del head (request line + headers)
pub const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Tamaño máximo del body
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Tramo máximo de una espera bloqueante
const POLL_SLICE: Duration = Duration::from_millis(100);

const READ_CHUNK: usize = 4096;

/// Resultado de esperar un head
#[derive(Debug, PartialEq, Eq)]
pub enum HeadRead {
    /// Head completo; el valor es su largo incluyendo `\r\n\r\n`
    Ready(usize),

    /// No llegó ningún byte antes del timeout de inactividad
    Idle,

    /// El cliente cerró sin enviar nada
    PeerClosed,

    /// Se pidió el apagado mientras la conexión estaba inactiva
    Shutdown,
}

/// Errores de lectura de un request ya iniciado
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("request head exceeds {MAX_HEAD_BYTES} bytes")]
    HeadTooLarge,

    #[error("timed out reading request")]
    Timeout,

    /// El cliente cerró a mitad de un request
    #[error("connection closed mid-request")]
    Truncated,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Busca el final del head (`\r\n\r\n`) y devuelve el largo total
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// Buffer de lectura de una conexión
#[derive(Debug, Default)]
pub struct RequestReader {
    buf: Vec<u8>,
}

impl RequestReader {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Bytes recibidos y aún no consumidos
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Descarta los primeros `n` bytes (el request ya atendido)
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.drain(..n);
    }

    /// Espera hasta tener un head completo en el buffer
    ///
    /// Sin bytes pendientes espera como máximo `idle_wait`, cortando antes si
    /// se pide el apagado. Una vez llegado el primer byte, el head completo
    /// debe llegar dentro de `request_timeout`.
    pub fn read_head(
        &mut self,
        stream: &TcpStream,
        idle_wait: Duration,
        request_timeout: Duration,
        shutdown: &ShutdownHandle,
    ) -> Result<HeadRead, ReadError> {
        let mut scanned = 0;
        let idle_deadline = Instant::now() + idle_wait;
        let mut request_deadline = (!self.buf.is_empty()).then(|| Instant::now() + request_timeout);

        loop {
            if let Some(end) = find_head_end(&self.buf[scanned..]).map(|e| e + scanned) {
                if end > MAX_HEAD_BYTES {
                    return Err(ReadError::HeadTooLarge);
                }
                return Ok(HeadRead::Ready(end));
            }
            if self.buf.len() >= MAX_HEAD_BYTES {
                return Err(ReadError::HeadTooLarge);
            }
            // El terminador puede quedar partido entre dos lecturas
            scanned = self.buf.len().saturating_sub(3);

            let deadline = request_deadline.unwrap_or(idle_deadline);
            match self.fill(stream, deadline)? {
                Fill::Data => {
                    if request_deadline.is_none() {
                        request_deadline = Some(Instant::now() + request_timeout);
                    }
                }
                Fill::Eof if self.buf.is_empty() => return Ok(HeadRead::PeerClosed),
                Fill::Eof => return Err(ReadError::Truncated),
                Fill::Pending => {
                    if request_deadline.is_some() {
                        if Instant::now() >= deadline {
                            return Err(ReadError::Timeout);
                        }
                    } else if shutdown.is_requested() {
                        return Ok(HeadRead::Shutdown);
                    } else if Instant::now() >= deadline {
                        return Ok(HeadRead::Idle);
                    }
                }
            }
        }
    }

    /// Asegura que el buffer tenga `total` bytes (head + body)
    pub fn read_to(
        &mut self,
        stream: &TcpStream,
        total: usize,
        request_timeout: Duration,
    ) -> Result<(), ReadError> {
        let deadline = Instant::now() + request_timeout;
        while self.buf.len() < total {
            match self.fill(stream, deadline)? {
                Fill::Data => {}
                Fill::Eof => return Err(ReadError::Truncated),
                Fill::Pending if Instant::now() >= deadline => return Err(ReadError::Timeout),
                Fill::Pending => {}
            }
        }
        Ok(())
    }

    /// Una lectura acotada por el próximo tramo de espera
    fn fill(&mut self, mut stream: &TcpStream, deadline: Instant) -> Result<Fill, ReadError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let slice = remaining.clamp(Duration::from_millis(1), POLL_SLICE);
        stream.set_read_timeout(Some(slice))?;

        let mut chunk = [0u8; READ_CHUNK];
        match stream.read(&mut chunk) {
            Ok(0) => Ok(Fill::Eof),
            Ok(n) => {
                self.buf.extend_from_slice(&chunk[..n]);
                Ok(Fill::Data)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(Fill::Pending)
            }
            Err(e) => Err(ReadError::Io(e)),
        }
    }
}

enum Fill {
    Data,
    Eof,
    Pending,
}
