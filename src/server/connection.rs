//! # Pipeline de una Conexión
//! src/server/connection.rs
//!
//! Corre dentro de un worker y atiende una conexión hasta cerrarla:
//!
//! ```text
//! ┌─> leer head ─> parsear ─> leer body ─> buscar ruta ─> handler ─> escribir ─┐
//! └──────────────────────── keep-alive? ───────────────────────────────────────┘
//! ```
//!
//! Errores de protocolo responden 400 y cierran. Una falta del handler
//! (error, panic o código inválido) responde 500. Un cliente inactivo o que
//! corta a mitad de un request se cierra sin respuesta.

use std::fmt;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};
use std::panic::{self, AssertUnwindSafe};

use super::ServerContext;
use crate::http::{
    HeadRead, ReadError, Request, RequestHead, RequestReader, Response, StatusClass, StatusCode,
    MAX_BODY_BYTES,
};
use crate::metrics::MetricsCollector;

/// Motivo por el que se cerró una conexión
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Keep-alive deshabilitado en la configuración
    KeepAliveDisabled,
    /// El cliente pidió cerrar (o HTTP/1.0 sin keep-alive)
    ClientRequested,
    /// Se alcanzó `max_keepalive_requests`
    RequestLimit,
    /// Venció el timeout de inactividad esperando el próximo request
    IdleTimeout,
    /// El cliente cerró la conexión
    PeerClosed,
    /// El servidor se está apagando
    Shutdown,
    /// Request malformado, demasiado grande o no soportado (400)
    ProtocolError,
    /// El handler falló después de haber enviado su respuesta
    HandlerAborted,
    /// Falló la lectura a mitad de un request
    ReadFailed,
    /// Falló la escritura de la respuesta
    WriteFailed,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::KeepAliveDisabled => "keep-alive disabled",
            CloseReason::ClientRequested => "client requested close",
            CloseReason::RequestLimit => "request limit reached",
            CloseReason::IdleTimeout => "idle timeout",
            CloseReason::PeerClosed => "peer closed",
            CloseReason::Shutdown => "server shutting down",
            CloseReason::ProtocolError => "protocol error",
            CloseReason::HandlerAborted => "handler failed after sending",
            CloseReason::ReadFailed => "read failed",
            CloseReason::WriteFailed => "write failed",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decide si la conexión sigue después de responder
///
/// `served` cuenta el request actual. Devuelve `None` para seguir o el motivo
/// de cierre.
pub fn keep_alive_decision(
    enabled: bool,
    client_wants_close: bool,
    served: u32,
    max_requests: u32,
    shutting_down: bool,
) -> Option<CloseReason> {
    if !enabled {
        Some(CloseReason::KeepAliveDisabled)
    } else if client_wants_close {
        Some(CloseReason::ClientRequested)
    } else if served >= max_requests {
        Some(CloseReason::RequestLimit)
    } else if shutting_down {
        Some(CloseReason::Shutdown)
    } else {
        None
    }
}

/// Serializa y escribe una respuesta, y la cuenta en las métricas
///
/// Solo una escritura completa se cuenta.
pub(crate) fn write_response(
    mut stream: &TcpStream,
    response: &Response,
    keep_alive: bool,
    include_body: bool,
    metrics: &MetricsCollector,
) -> io::Result<usize> {
    let bytes = response.to_bytes(keep_alive, include_body);
    stream.write_all(&bytes)?;
    stream.flush()?;
    metrics.record_response(response.status(), bytes.len());
    Ok(bytes.len())
}

/// Atiende una conexión completa y devuelve por qué se cerró
///
/// El socket se cierra al salir, en cualquier camino.
pub(crate) fn serve_connection(ctx: &ServerContext, stream: TcpStream, peer: SocketAddr) -> CloseReason {
    let config = &ctx.config;
    let logger = config.logger();

    // Sin estos ajustes el pipeline igual funciona; solo se registra
    if let Err(e) = stream
        .set_nodelay(true)
        .and_then(|_| stream.set_write_timeout(Some(config.request_timeout())))
    {
        logger.debug(format_args!("{peer}: socket setup failed: {e}"));
    }

    let mut reader = RequestReader::new();
    let mut served: u32 = 0;

    loop {
        // El primer request tiene el timeout de request; los siguientes el
        // de inactividad keep-alive
        let idle_wait = if served == 0 {
            config.request_timeout()
        } else {
            config.keepalive_timeout()
        };

        // 1. Head
        let head_len =
            match reader.read_head(&stream, idle_wait, config.request_timeout(), &ctx.shutdown) {
                Ok(HeadRead::Ready(len)) => len,
                Ok(HeadRead::Idle) => return CloseReason::IdleTimeout,
                Ok(HeadRead::PeerClosed) => return CloseReason::PeerClosed,
                Ok(HeadRead::Shutdown) => return CloseReason::Shutdown,
                Err(e @ (ReadError::HeadTooLarge | ReadError::Timeout)) => {
                    return reject(ctx, &stream, peer, &e.to_string());
                }
                Err(e) => {
                    logger.debug(format_args!("{peer}: {e}"));
                    return CloseReason::ReadFailed;
                }
            };

        let head = match RequestHead::parse(&reader.buffered()[..head_len]) {
            Ok(head) => head,
            Err(e) => return reject(ctx, &stream, peer, &e.to_string()),
        };

        // 2. Body
        let body_len = match head.body_length(MAX_BODY_BYTES) {
            Ok(len) => len,
            Err(e) => return reject(ctx, &stream, peer, &e.to_string()),
        };
        let total = head_len + body_len;
        match reader.read_to(&stream, total, config.request_timeout()) {
            Ok(()) => {}
            Err(e @ ReadError::Timeout) => return reject(ctx, &stream, peer, &e.to_string()),
            Err(e) => {
                logger.debug(format_args!("{peer}: {e}"));
                return CloseReason::ReadFailed;
            }
        }

        served += 1;
        let close = keep_alive_decision(
            config.keepalive_enabled(),
            head.wants_close(),
            served,
            config.max_keepalive_requests(),
            ctx.shutdown.is_requested(),
        );

        // 3-5. Ruta, handler y respuesta
        let body = &reader.buffered()[head_len..total];
        if let Err(reason) = handle_request(ctx, &stream, peer, head, body, close.is_none()) {
            return reason;
        }
        reader.consume(total);

        // 6. Keep-alive
        if let Some(reason) = close {
            return reason;
        }
    }
}

/// Responde 400 y cierra
fn reject(ctx: &ServerContext, stream: &TcpStream, peer: SocketAddr, message: &str) -> CloseReason {
    ctx.config
        .logger()
        .debug(format_args!("{peer}: bad request: {message}"));

    let response = Response::error(StatusCode::BadRequest, message);
    // El cliente puede haberse ido; igual se cierra
    let _ = write_response(stream, &response, false, true, &ctx.metrics);
    CloseReason::ProtocolError
}

/// Busca la ruta, invoca el handler y escribe la respuesta
fn handle_request(
    ctx: &ServerContext,
    stream: &TcpStream,
    peer: SocketAddr,
    head: RequestHead,
    body: &[u8],
    keep_alive: bool,
) -> Result<(), CloseReason> {
    let logger = ctx.config.logger();
    let include_body = head.method() != "HEAD";

    let Some(route) = ctx.routes.lookup(head.method(), head.path()) else {
        let message = format!("no route for {} {}", head.method(), head.path());
        logger.debug(format_args!("{peer} {} {} -> 404", head.method(), head.path()));
        let response = Response::error(StatusCode::NotFound, &message);
        return write_response(stream, &response, keep_alive, include_body, &ctx.metrics)
            .map(|_| ())
            .map_err(|_| CloseReason::WriteFailed);
    };

    let label = format!("{} {}", head.method(), head.path());
    let request = Request::new(head, body, stream, peer, ctx, route.user_data(), keep_alive);
    let handler = route.handler();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&request)));

    // El handler ya escribió con send_response
    if request.is_committed() {
        return match outcome {
            Ok(Ok(response)) => {
                logger.debug(format_args!("{peer} {label} -> {}", response.status()));
                Ok(())
            }
            Ok(Err(e)) => {
                logger.warn(format_args!("{peer} {label}: handler failed after sending: {e}"));
                Err(CloseReason::HandlerAborted)
            }
            Err(payload) => {
                logger.warn(format_args!(
                    "{peer} {label}: handler panicked after sending: {}",
                    panic_message(payload.as_ref())
                ));
                Err(CloseReason::HandlerAborted)
            }
        };
    }

    let response = match outcome {
        Ok(Ok(response)) if StatusClass::of(response.status()).is_some() => response,
        Ok(Ok(response)) => {
            logger.warn(format_args!(
                "{peer} {label}: handler returned invalid status {}",
                response.status()
            ));
            internal_error()
        }
        Ok(Err(e)) => {
            logger.warn(format_args!("{peer} {label}: handler failed: {e}"));
            internal_error()
        }
        Err(payload) => {
            logger.warn(format_args!(
                "{peer} {label}: handler panicked: {}",
                panic_message(payload.as_ref())
            ));
            internal_error()
        }
    };

    logger.debug(format_args!("{peer} {label} -> {}", response.status()));
    write_response(stream, &response, keep_alive, include_body, &ctx.metrics)
        .map(|_| ())
        .map_err(|_| CloseReason::WriteFailed)
}

fn internal_error() -> Response {
    Response::error(StatusCode::InternalServerError, "internal server error")
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerConfig, ServerOptions};
    use crate::error::HandlerError;
    use crate::metrics::MetricsCollector;
    use crate::router::Router;
    use crate::server::ShutdownHandle;
    use std::io::Read;
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn context(keepalive: bool, max_requests: u32, routes: Router) -> Arc<ServerContext> {
        let config = ServerConfig::from_options(ServerOptions {
            nthreads: Some(1),
            enable_keepalive: Some(keepalive),
            max_keepalive_requests: Some(max_requests),
            keepalive_timeout_ms: Some(300),
            request_timeout_ms: Some(500),
            log_to_stderr: Some(false),
            ..ServerOptions::default()
        })
        .unwrap();
        Arc::new(ServerContext {
            config,
            routes,
            metrics: Arc::new(MetricsCollector::new(1)),
            shutdown: ShutdownHandle::new(),
        })
    }

    fn demo_routes() -> Router {
        let mut routes = Router::new();
        routes
            .register("GET", "/", |_req| Ok(Response::text(StatusCode::Ok, "root\n")), None)
            .unwrap();
        routes
            .register(
                "POST",
                "/echo",
                |req| Ok(Response::new(StatusCode::Ok).with_body_bytes(req.body().to_vec())),
                None,
            )
            .unwrap();
        routes
            .register("GET", "/boom", |_req| panic!("boom"), None)
            .unwrap();
        routes
            .register("GET", "/fail", |_req| Err(HandlerError::msg("nope")), None)
            .unwrap();
        routes
            .register("GET", "/weird", |_req| Ok(Response::with_status(700, "Weird")), None)
            .unwrap();
        routes
            .register(
                "GET",
                "/direct",
                |req| req.send_response(201, "Created", "text/plain", b"direct"),
                None,
            )
            .unwrap();
        routes
            .register(
                "GET",
                "/split",
                |req| req.send_response(200, "OK\r\nX-Injected: 1", "text/plain", b"split"),
                None,
            )
            .unwrap();
        routes
            .register(
                "GET",
                "/twice",
                |req| {
                    req.send_response(200, "OK", "text/plain", b"once")?;
                    req.send_response(200, "OK", "text/plain", b"twice")
                },
                None,
            )
            .unwrap();
        routes
    }

    /// Corre el pipeline sobre una conexión loopback y devuelve
    /// (lo que recibió el cliente, motivo de cierre)
    fn exchange(ctx: Arc<ServerContext>, input: &[u8]) -> (String, CloseReason) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer) = listener.accept().unwrap();

        let server = thread::spawn(move || serve_connection(&ctx, stream, peer));

        client.write_all(input).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut out = Vec::new();
        let _ = client.read_to_end(&mut out);

        (String::from_utf8_lossy(&out).into_owned(), server.join().unwrap())
    }

    #[test]
    fn test_keep_alive_decision() {
        assert_eq!(
            keep_alive_decision(false, false, 1, 10, false),
            Some(CloseReason::KeepAliveDisabled)
        );
        assert_eq!(
            keep_alive_decision(true, true, 1, 10, false),
            Some(CloseReason::ClientRequested)
        );
        assert_eq!(
            keep_alive_decision(true, false, 10, 10, false),
            Some(CloseReason::RequestLimit)
        );
        assert_eq!(
            keep_alive_decision(true, false, 1, 10, true),
            Some(CloseReason::Shutdown)
        );
        assert_eq!(keep_alive_decision(true, false, 9, 10, false), None);
    }

    #[test]
    fn test_single_request_without_keepalive() {
        let ctx = context(false, 100, demo_routes());
        let (out, reason) = exchange(Arc::clone(&ctx), b"GET / HTTP/1.1\r\n\r\n");

        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("Connection: close\r\n"));
        assert!(out.ends_with("root\n"));
        assert_eq!(reason, CloseReason::KeepAliveDisabled);
        assert_eq!(ctx.metrics.snapshot().resp_2xx, 1);
    }

    #[test]
    fn test_pipelined_requests_in_order() {
        let ctx = context(true, 100, demo_routes());
        let input = b"POST /echo HTTP/1.1\r\nContent-Length: 3\r\n\r\nonePOST /echo HTTP/1.1\r\nContent-Length: 3\r\nConnection: close\r\n\r\ntwo";
        let (out, reason) = exchange(ctx, input);

        let first = out.find("one").unwrap();
        let second = out.find("two").unwrap();
        assert!(first < second);
        assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 2);
        assert_eq!(reason, CloseReason::ClientRequested);
    }

    #[test]
    fn test_keepalive_request_limit() {
        let ctx = context(true, 2, demo_routes());
        let input = b"GET / HTTP/1.1\r\n\r\nGET / HTTP/1.1\r\n\r\n";
        let (out, reason) = exchange(ctx, input);

        assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 2);
        assert!(out.contains("Connection: keep-alive\r\n"));
        assert!(out.contains("Connection: close\r\n"));
        assert_eq!(reason, CloseReason::RequestLimit);
    }

    #[test]
    fn test_idle_timeout_closes_silently() {
        let ctx = context(true, 100, demo_routes());
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer) = listener.accept().unwrap();
        let server = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || serve_connection(&ctx, stream, peer))
        };

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(server.join().unwrap(), CloseReason::IdleTimeout);

        let mut out = String::new();
        client.read_to_string(&mut out).unwrap();
        assert_eq!(out.matches("HTTP/1.1").count(), 1);
        assert_eq!(ctx.metrics.snapshot().resp_4xx, 0);
    }

    #[test]
    fn test_not_found() {
        let ctx = context(false, 100, demo_routes());
        let (out, _) = exchange(Arc::clone(&ctx), b"GET /missing HTTP/1.1\r\n\r\n");

        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(out.contains(r#"{"error":"no route for GET /missing"}"#));
        assert_eq!(ctx.metrics.snapshot().resp_4xx, 1);
    }

    #[test]
    fn test_method_mismatch_is_not_found() {
        let ctx = context(false, 100, demo_routes());
        let (out, _) = exchange(ctx, b"DELETE / HTTP/1.1\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn test_malformed_request() {
        let ctx = context(true, 100, demo_routes());
        let (out, reason) = exchange(Arc::clone(&ctx), b"NOT A REQUEST LINE\r\n\r\n");

        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(out.contains("Connection: close\r\n"));
        assert_eq!(reason, CloseReason::ProtocolError);
        assert_eq!(ctx.metrics.snapshot().resp_4xx, 1);
    }

    #[test]
    fn test_chunked_rejected() {
        let ctx = context(true, 100, demo_routes());
        let (out, reason) = exchange(
            ctx,
            b"POST /echo HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n",
        );
        assert!(out.starts_with("HTTP/1.1 400"));
        assert_eq!(reason, CloseReason::ProtocolError);
    }

    #[test]
    fn test_handler_panic_is_500() {
        let ctx = context(true, 100, demo_routes());
        let (out, _) = exchange(
            Arc::clone(&ctx),
            b"GET /boom HTTP/1.1\r\n\r\nGET / HTTP/1.1\r\nConnection: close\r\n\r\n",
        );

        assert!(out.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        // La conexión sigue atendiendo después de la falta
        assert!(out.contains("root\n"));

        let snapshot = ctx.metrics.snapshot();
        assert_eq!(snapshot.resp_5xx, 1);
        assert_eq!(snapshot.resp_2xx, 1);
    }

    #[test]
    fn test_handler_error_and_invalid_status_are_500() {
        let ctx = context(false, 100, demo_routes());
        let (out, _) = exchange(Arc::clone(&ctx), b"GET /fail HTTP/1.1\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 500"));

        let (out, _) = exchange(Arc::clone(&ctx), b"GET /weird HTTP/1.1\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 500"));
        assert_eq!(ctx.metrics.snapshot().resp_5xx, 2);
    }

    #[test]
    fn test_send_response_writes_once() {
        let ctx = context(false, 100, demo_routes());
        let (out, _) = exchange(Arc::clone(&ctx), b"GET /direct HTTP/1.1\r\n\r\n");

        assert!(out.starts_with("HTTP/1.1 201 Created\r\n"));
        assert!(out.contains("Content-Type: text/plain\r\n"));
        assert_eq!(out.matches("HTTP/1.1").count(), 1);
        assert_eq!(ctx.metrics.snapshot().resp_2xx, 1);
    }

    #[test]
    fn test_send_response_twice_closes() {
        let ctx = context(true, 100, demo_routes());
        let (out, reason) = exchange(ctx, b"GET /twice HTTP/1.1\r\n\r\n");

        assert!(out.ends_with("once"));
        assert_eq!(out.matches("HTTP/1.1").count(), 1);
        assert_eq!(reason, CloseReason::HandlerAborted);
    }

    #[test]
    fn test_send_response_rejects_control_characters() {
        let ctx = context(false, 100, demo_routes());
        let (out, _) = exchange(Arc::clone(&ctx), b"GET /split HTTP/1.1\r\n\r\n");

        // No se escribió nada del handler: el pipeline responde 500
        assert!(out.starts_with("HTTP/1.1 500"));
        assert!(!out.contains("X-Injected"));
        assert_eq!(out.matches("HTTP/1.1").count(), 1);
        assert_eq!(ctx.metrics.snapshot().resp_5xx, 1);
    }

    #[test]
    fn test_head_request_omits_body() {
        let mut routes = Router::new();
        routes
            .register("HEAD", "/", |_req| Ok(Response::text(StatusCode::Ok, "hidden")), None)
            .unwrap();
        let ctx = context(false, 100, routes);
        let (out, _) = exchange(ctx, b"HEAD / HTTP/1.1\r\n\r\n");

        assert!(out.contains("Content-Length: 6\r\n"));
        assert!(out.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_body_too_large() {
        let ctx = context(false, 100, demo_routes());
        let input = format!(
            "POST /echo HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            MAX_BODY_BYTES + 1
        );
        let (out, reason) = exchange(ctx, input.as_bytes());
        assert!(out.starts_with("HTTP/1.1 400"));
        assert_eq!(reason, CloseReason::ProtocolError);
    }

    #[test]
    fn test_http10_closes_by_default() {
        let ctx = context(true, 100, demo_routes());
        let (out, reason) = exchange(ctx, b"GET / HTTP/1.0\r\n\r\n");
        assert!(out.contains("Connection: close\r\n"));
        assert_eq!(reason, CloseReason::ClientRequested);
    }

    #[test]
    fn test_shutdown_forces_close() {
        let ctx = context(true, 100, demo_routes());
        ctx.shutdown.request();
        let (out, reason) = exchange(ctx, b"GET / HTTP/1.1\r\n\r\n");
        assert!(out.contains("Connection: close\r\n"));
        assert_eq!(reason, CloseReason::Shutdown);
    }
}
