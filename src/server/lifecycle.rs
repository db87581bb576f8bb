//! # Ciclo de Vida del Servidor
//! src/server/lifecycle.rs
//!
//! ```text
//! Created ──run()──> Running ──shutdown──> ShuttingDown ──> Stopped
//!    └──────── bind/listen falla ─────────────────────────────┘
//! ```
//!
//! `run` bloquea al thread llamador mientras el servidor atiende. El thread
//! llamador actúa como controlador: espera el pedido de apagado y luego cierra
//! la cola, espera al acceptor y a los workers, en ese orden.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::acceptor::run_acceptor;
use super::net::bind_listener;
use super::worker::spawn_workers;
use super::{ServerContext, ShutdownHandle};
use crate::config::{ServerConfig, ServerOptions};
use crate::dispatch::DispatchQueue;
use crate::error::{ConfigError, RouteError, ServerError};
use crate::http::Request;
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::router::{HandlerResult, Router, UserData};

/// Intervalo con el que el controlador revisa el flag de apagado
const CONTROL_TICK: Duration = Duration::from_millis(50);

/// Estado del servidor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::Created => "created",
            ServerState::Running => "running",
            ServerState::ShuttingDown => "shutting-down",
            ServerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Servidor HTTP/1.1 embebible
///
/// Todos los métodos toman `&self`; un `Arc<Server>` puede compartirse entre
/// el thread que llama a `run` y los que consultan métricas o piden apagado.
///
/// # Ejemplo
///
/// ```no_run
/// use webserver::config::ServerOptions;
/// use webserver::http::{Response, StatusCode};
/// use webserver::server::Server;
///
/// let server = Server::new(ServerOptions::default()).unwrap();
/// server
///     .add_route("GET", "/", |_req| Ok(Response::text(StatusCode::Ok, "hi\n")), None)
///     .unwrap();
/// server.run().unwrap();
/// ```
pub struct Server {
    config: ServerConfig,

    /// Rutas registradas; `run` las toma y quedan congeladas
    routes: Mutex<Option<Router>>,

    state: Mutex<ServerState>,
    local_addr: Mutex<Option<SocketAddr>>,
    metrics: Arc<MetricsCollector>,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Crea un servidor validando las opciones
    pub fn new(options: ServerOptions) -> Result<Self, ConfigError> {
        Ok(Self::with_config(ServerConfig::from_options(options)?))
    }

    /// Crea un servidor con una configuración ya validada
    pub fn with_config(config: ServerConfig) -> Self {
        let metrics = Arc::new(MetricsCollector::new(config.nthreads()));
        Self {
            config,
            routes: Mutex::new(Some(Router::new())),
            state: Mutex::new(ServerState::Created),
            local_addr: Mutex::new(None),
            metrics,
            shutdown: ShutdownHandle::new(),
        }
    }

    /// Registra una ruta; solo antes de `run`
    pub fn add_route<F>(
        &self,
        method: &str,
        path: &str,
        handler: F,
        user_data: Option<UserData>,
    ) -> Result<(), RouteError>
    where
        F: Fn(&Request<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        lock(&self.routes)
            .as_mut()
            .ok_or(RouteError::ServerStarted)?
            .register(method, path, handler, user_data)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ServerState) {
        *lock(&self.state) = state;
    }

    /// Dirección real de escucha, disponible desde que el servidor está Running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    /// Snapshot de las métricas
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Handle para pedir el apagado desde otro thread o un handler de señales
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Pide el apagado; llamadas repetidas no tienen efecto
    pub fn request_shutdown(&self) {
        self.shutdown.request();
    }

    /// Arranca el servidor y bloquea hasta que se apague
    ///
    /// Devuelve `Ok(())` en un apagado limpio, `ServerError::Bind`/`Listen` si
    /// no se pudo abrir el puerto y `ServerError::Internal` si algún thread
    /// del motor terminó con panic.
    pub fn run(&self) -> Result<(), ServerError> {
        let routes = lock(&self.routes)
            .take()
            .ok_or_else(|| ServerError::InvalidState(self.state().as_str()))?;
        let logger = self.config.logger().clone();

        let listener = match bind_listener(self.config.address(), self.config.backlog()) {
            Ok(listener) => listener,
            Err(e) => {
                logger.error(format_args!("{e}"));
                self.set_state(ServerState::Stopped);
                return Err(e);
            }
        };
        let addr = listener.local_addr().unwrap_or_else(|_| self.config.address());
        *lock(&self.local_addr) = Some(addr);

        let ctx = Arc::new(ServerContext {
            config: self.config.clone(),
            routes,
            metrics: Arc::clone(&self.metrics),
            shutdown: self.shutdown.clone(),
        });
        let queue = Arc::new(DispatchQueue::new(
            self.config.queue_capacity(),
            self.config.queue_policy(),
            Arc::clone(&self.metrics),
        ));

        let workers = match spawn_workers(self.config.nthreads(), &ctx, &queue) {
            Ok(workers) => workers,
            Err((e, started)) => {
                queue.close();
                join_all(started);
                logger.error(format_args!("{e}"));
                self.set_state(ServerState::Stopped);
                return Err(e);
            }
        };

        let acceptor = {
            let queue = Arc::clone(&queue);
            let metrics = Arc::clone(&self.metrics);
            let shutdown = self.shutdown.clone();
            let logger = logger.clone();
            thread::Builder::new()
                .name("ws-acceptor".to_string())
                .spawn(move || run_acceptor(listener, &queue, &metrics, &shutdown, &logger))
        };
        let acceptor = match acceptor {
            Ok(handle) => handle,
            Err(source) => {
                queue.close();
                join_all(workers);
                self.set_state(ServerState::Stopped);
                let e = ServerError::Spawn {
                    what: "acceptor",
                    source,
                };
                logger.error(format_args!("{e}"));
                return Err(e);
            }
        };

        self.set_state(ServerState::Running);
        logger.info(format_args!(
            "listening on {addr} ({} workers, queue {} {}, keep-alive {})",
            self.config.nthreads(),
            self.config.queue_capacity(),
            self.config.queue_policy(),
            if self.config.keepalive_enabled() { "on" } else { "off" },
        ));

        while !self.shutdown.is_requested() && !acceptor.is_finished() {
            thread::sleep(CONTROL_TICK);
        }

        self.set_state(ServerState::ShuttingDown);
        // Si el acceptor terminó solo, el resto también debe parar
        self.shutdown.request();
        logger.info(format_args!("shutting down"));

        let abandoned = queue.close();
        if abandoned > 0 {
            logger.info(format_args!("abandoned {abandoned} queued connections"));
        }

        let mut fault = None;
        if acceptor.join().is_err() {
            fault = Some(ServerError::Internal("acceptor thread panicked".to_string()));
        }
        let panicked = join_all(workers);
        if panicked > 0 && fault.is_none() {
            fault = Some(ServerError::Internal(format!(
                "{panicked} worker thread(s) panicked"
            )));
        }

        self.set_state(ServerState::Stopped);
        match fault {
            Some(e) => {
                logger.error(format_args!("{e}"));
                Err(e)
            }
            None => {
                logger.info(format_args!("stopped"));
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

/// Espera a todos los threads y devuelve cuántos hicieron panic
fn join_all(handles: Vec<JoinHandle<()>>) -> usize {
    handles
        .into_iter()
        .map(JoinHandle::join)
        .filter(Result::is_err)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Response, StatusCode};
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::Instant;

    fn test_options() -> ServerOptions {
        ServerOptions {
            host: Some("127.0.0.1".parse().unwrap()),
            port: Some(0),
            nthreads: Some(2),
            log_to_stderr: Some(false),
            ..ServerOptions::default()
        }
    }

    fn start(server: &Arc<Server>) -> (JoinHandle<Result<(), ServerError>>, SocketAddr) {
        let runner = {
            let server = Arc::clone(server);
            thread::spawn(move || server.run())
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(addr) = server.local_addr() {
                if server.state() == ServerState::Running {
                    return (runner, addr);
                }
            }
            assert!(Instant::now() < deadline, "server did not start");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_state_transitions() {
        let server = Arc::new(Server::new(test_options()).unwrap());
        assert_eq!(server.state(), ServerState::Created);

        let (runner, _) = start(&server);
        assert_eq!(server.state(), ServerState::Running);

        server.request_shutdown();
        runner.join().unwrap().unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[test]
    fn test_run_twice_is_invalid() {
        let server = Arc::new(Server::new(test_options()).unwrap());
        let (runner, _) = start(&server);

        assert!(matches!(server.run(), Err(ServerError::InvalidState(_))));

        server.request_shutdown();
        runner.join().unwrap().unwrap();
        assert!(matches!(server.run(), Err(ServerError::InvalidState("stopped"))));
    }

    #[test]
    fn test_routes_frozen_after_start() {
        let server = Arc::new(Server::new(test_options()).unwrap());
        server
            .add_route("GET", "/", |_req| Ok(Response::text(StatusCode::Ok, "x")), None)
            .unwrap();
        let (runner, _) = start(&server);

        let err = server
            .add_route("GET", "/late", |_req| Ok(Response::text(StatusCode::Ok, "y")), None)
            .unwrap_err();
        assert_eq!(err, RouteError::ServerStarted);

        server.request_shutdown();
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn test_bind_failure_stops_server() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();

        let server = Server::new(ServerOptions {
            port: Some(port),
            ..test_options()
        })
        .unwrap();

        let err = server.run().unwrap_err();
        assert!(err.is_startup_failure());
        assert_eq!(server.state(), ServerState::Stopped);
        assert_eq!(server.metrics().accepted, 0);
    }

    #[test]
    fn test_shutdown_before_run_returns_promptly() {
        let server = Server::new(test_options()).unwrap();
        server.request_shutdown();
        server.request_shutdown();

        let started = Instant::now();
        server.run().unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[test]
    fn test_shutdown_from_handler() {
        let server = Arc::new(Server::new(test_options()).unwrap());
        server
            .add_route(
                "POST",
                "/quit",
                |req| {
                    req.shutdown_handle().request();
                    Ok(Response::text(StatusCode::Ok, "bye\n"))
                },
                None,
            )
            .unwrap();
        let (runner, addr) = start(&server);

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"POST /quit HTTP/1.1\r\n\r\n").unwrap();
        let mut out = String::new();
        client.read_to_string(&mut out).unwrap();
        assert!(out.ends_with("bye\n"));

        runner.join().unwrap().unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[test]
    fn test_invalid_options_rejected() {
        let result = Server::new(ServerOptions {
            nthreads: Some(0),
            ..test_options()
        });
        assert!(result.is_err());
    }
}
