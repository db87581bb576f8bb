//! # Socket de Escucha
//! src/server/net.rs
//!
//! `TcpListener::bind` usa un backlog fijo; se vuelve a llamar a `listen(2)`
//! con el backlog configurado. El listener queda no bloqueante y el acceptor
//! espera conexiones con `poll(2)` en tramos cortos para poder notar el
//! pedido de apagado.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use crate::error::ServerError;

/// Abre el socket de escucha con el backlog pedido
pub fn bind_listener(addr: SocketAddr, backlog: u32) -> Result<TcpListener, ServerError> {
    let listener = TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;

    let backlog = libc::c_int::try_from(backlog).unwrap_or(libc::c_int::MAX);
    // SAFETY: el fd pertenece a `listener`, que sigue vivo
    let rc = unsafe { libc::listen(listener.as_raw_fd(), backlog) };
    if rc != 0 {
        return Err(ServerError::Listen {
            addr,
            source: io::Error::last_os_error(),
        });
    }

    listener
        .set_nonblocking(true)
        .map_err(|source| ServerError::Listen { addr, source })?;

    Ok(listener)
}

/// Espera hasta `timeout` a que haya una conexión pendiente
///
/// Devuelve `Ok(false)` al vencer el plazo o si una señal interrumpe la espera.
pub fn wait_readable(listener: &TcpListener, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd: listener.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

    // SAFETY: `pfd` es un único pollfd válido durante la llamada
    let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(rc > 0)
}
