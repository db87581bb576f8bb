//! Utilidades compartidas por los tests de integración
//! tests/common/mod.rs
//!
//! Arrancan un servidor real en `127.0.0.1:0` dentro de un thread y hablan
//! con él por `TcpStream`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use webserver::config::ServerOptions;
use webserver::error::ServerError;
use webserver::server::{Server, ServerState};

/// Servidor corriendo en background
pub struct TestServer {
    pub server: Arc<Server>,
    pub addr: SocketAddr,
    runner: Option<JoinHandle<Result<(), ServerError>>>,
}

impl TestServer {
    /// Arranca un servidor con las rutas que registre `setup`
    pub fn start(options: ServerOptions, setup: impl FnOnce(&Server)) -> Self {
        let server = Arc::new(
            Server::new(ServerOptions {
                host: Some("127.0.0.1".parse().unwrap()),
                port: Some(0),
                log_to_stderr: Some(false),
                ..options
            })
            .expect("valid options"),
        );
        setup(&server);

        let runner = {
            let server = Arc::clone(&server);
            thread::spawn(move || server.run())
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        let addr = loop {
            if server.state() == ServerState::Running {
                if let Some(addr) = server.local_addr() {
                    break addr;
                }
            }
            assert!(Instant::now() < deadline, "server did not start");
            thread::sleep(Duration::from_millis(10));
        };

        Self {
            server,
            addr,
            runner: Some(runner),
        }
    }

    pub fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }

    /// Pide el apagado y espera el resultado de `run`
    pub fn stop(mut self) -> Result<(), ServerError> {
        self.server.request_shutdown();
        self.runner
            .take()
            .expect("runner")
            .join()
            .expect("run thread panicked")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(runner) = self.runner.take() {
            self.server.request_shutdown();
            let _ = runner.join();
        }
    }
}

/// Respuesta HTTP leída del socket
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Envía bytes crudos
pub fn send(stream: &mut TcpStream, raw: &str) {
    stream.write_all(raw.as_bytes()).expect("write request");
}

/// GET con HTTP/1.1 sobre una conexión existente
pub fn get(stream: &mut TcpStream, path: &str) -> Option<HttpResponse> {
    send(stream, &format!("GET {path} HTTP/1.1\r\nHost: test\r\n\r\n"));
    read_response(stream)
}

/// Lee una respuesta completa usando Content-Length
///
/// `None` si la conexión se cerró antes de recibir un head.
pub fn read_response(stream: &mut TcpStream) -> Option<HttpResponse> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];

    while !buf.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte) {
            Ok(0) | Err(_) => return None,
            Ok(_) => buf.push(byte[0]),
        }
    }

    let head = String::from_utf8_lossy(&buf).into_owned();
    let mut lines = head.split("\r\n");
    let status_line = lines.next()?;
    let status: u16 = status_line.split(' ').nth(1)?.parse().ok()?;

    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).ok()?;

    Some(HttpResponse {
        status,
        headers,
        body,
    })
}

/// Verifica que el servidor cerró la conexión (EOF o reset)
pub fn is_closed(stream: &mut TcpStream) -> bool {
    let mut byte = [0u8; 1];
    matches!(stream.read(&mut byte), Ok(0) | Err(_))
}

/// Espera hasta que `cond` sea verdadera o venza el plazo
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}
