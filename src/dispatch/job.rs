//! # Job de Conexión
//! src/dispatch/job.rs
//!
//! Una conexión aceptada en tránsito entre el acceptor y un worker. El job es
//! dueño exclusivo del socket: se mueve a la cola y de ahí a un único worker.
//! Si se descarta en cualquier punto, el socket se cierra al soltarlo.

use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

/// Conexión aceptada esperando un worker
#[derive(Debug)]
pub struct ConnectionJob {
    stream: TcpStream,
    peer: SocketAddr,
    accepted_at: Instant,
}

impl ConnectionJob {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            accepted_at: Instant::now(),
        }
    }

    /// Dirección del cliente
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn accepted_at(&self) -> Instant {
        self.accepted_at
    }

    /// Tiempo transcurrido desde el accept
    pub fn waited(&self) -> Duration {
        self.accepted_at.elapsed()
    }

    /// Entrega el socket al worker que atiende la conexión
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn test_job_owns_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer) = listener.accept().unwrap();

        let job = ConnectionJob::new(stream, peer);
        assert_eq!(job.peer(), client.local_addr().unwrap());
        assert!(job.waited() < Duration::from_secs(5));

        // Soltar el job cierra la conexión: el cliente lee EOF
        drop(job);
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }
}
