//! # Acceptor
//! src/server/acceptor.rs
//!
//! Thread único que acepta conexiones y las ofrece a la cola de despacho.
//! Espera con `poll(2)` en tramos de 100 ms para notar el pedido de apagado;
//! al salir suelta el listener, lo que cierra el socket de escucha.

use std::io;
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use super::net::wait_readable;
use super::ShutdownHandle;
use crate::dispatch::{Admission, ConnectionJob, DispatchQueue};
use crate::logging::Logger;
use crate::metrics::MetricsCollector;

/// Tramo máximo de espera entre chequeos del flag de apagado
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Pausa después de un error de accept (p.ej. sin descriptores)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// Loop del acceptor; vuelve cuando se pide el apagado o la cola se cierra
pub(crate) fn run_acceptor(
    listener: TcpListener,
    queue: &DispatchQueue,
    metrics: &MetricsCollector,
    shutdown: &ShutdownHandle,
    logger: &Logger,
) {
    while !shutdown.is_requested() {
        match wait_readable(&listener, ACCEPT_POLL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                logger.warn(format_args!("poll on listener failed: {e}"));
                thread::sleep(ACCEPT_BACKOFF);
                continue;
            }
        }

        // Aceptar todas las conexiones pendientes
        loop {
            let (stream, peer) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    logger.warn(format_args!("accept failed: {e}"));
                    thread::sleep(ACCEPT_BACKOFF);
                    break;
                }
            };

            // En algunas plataformas el socket hereda O_NONBLOCK del listener
            if let Err(e) = stream.set_nonblocking(false) {
                logger.warn(format_args!("{peer}: cannot configure socket: {e}"));
                continue;
            }

            metrics.record_accepted();
            match queue.offer(ConnectionJob::new(stream, peer)) {
                Admission::Enqueued => {}
                Admission::DroppedNew => {
                    logger.debug(format_args!("{peer}: queue full, connection dropped"));
                }
                Admission::DroppedOldest => {
                    logger.debug(format_args!("{peer}: queue full, oldest connection dropped"));
                }
                Admission::Closed => return,
            }

            if shutdown.is_requested() {
                return;
            }
        }
    }
}
