//! # Parsing de Requests HTTP/1.1
//! src/http/request.rs
//!
//! Este módulo implementa el parser del encabezado (head) de un request y la
//! vista [`Request`] que reciben los handlers.
//!
//! ## Formato de un Request
//!
//! ```text
//! GET /path?param1=value1&param2=value2 HTTP/1.1\r\n
//! Host: localhost:8080\r\n
//! Content-Length: 5\r\n
//! \r\n
//! hello
//! ```
//!
//! ## Componentes
//!
//! 1. **Request Line**: `METHOD /path?query HTTP/1.x`
//! 2. **Headers**: Pares `Name: Value` (uno por línea, nombres sin distinguir
//!    mayúsculas, el último valor gana)
//! 3. **Empty Line**: `\r\n` que separa headers del body
//! 4. **Body**: exactamente `Content-Length` bytes (chunked no soportado)

use std::any::Any;
use std::cell::Cell;
use std::collections::HashMap;
use std::net::{SocketAddr, TcpStream};

use super::{Response, StatusClass};
use crate::error::HandlerError;
use crate::metrics::MetricsSnapshot;
use crate::router::UserData;
use crate::server::connection::write_response;
use crate::server::{ServerContext, ShutdownHandle};

/// Máximo de headers aceptados en un request
pub const MAX_HEADERS: usize = 100;

/// Versión HTTP del request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

/// Errores que pueden ocurrir durante el parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Request vacío
    #[error("Empty request")]
    EmptyRequest,

    /// Formato inválido de la request line
    #[error("Invalid request line format")]
    InvalidRequestLine,

    /// Método que no es un token HTTP
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// Target que no empieza con '/'
    #[error("Invalid request target: {0}")]
    InvalidTarget(String),

    /// Versión HTTP no soportada
    #[error("Invalid HTTP version: {0}")]
    InvalidHttpVersion(String),

    /// Header malformado
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Demasiados headers
    #[error("Too many headers")]
    TooManyHeaders,

    /// Content-Length no numérico o repetido con valores distintos
    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),

    /// Transfer-Encoding distinto de identity (chunked no soportado)
    #[error("Unsupported Transfer-Encoding: {0}")]
    UnsupportedTransferEncoding(String),

    /// Body mayor al límite
    #[error("Request body too large ({0} bytes)")]
    BodyTooLarge(usize),
}

/// Encabezado parseado de un request
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// Método tal cual llegó (sensible a mayúsculas)
    method: String,

    /// Target original, con query string
    target: String,

    /// Path sin query string ni fragmento
    path: String,

    /// Query parameters decodificados
    query_params: HashMap<String, String>,

    version: Version,

    /// Headers con nombres en minúsculas
    headers: HashMap<String, String>,
}

impl RequestHead {
    /// Parsea el head de un request desde bytes
    ///
    /// `buffer` debe contener la request line y los headers; lo que venga
    /// después de la línea vacía se ignora.
    ///
    /// # Ejemplo
    ///
    /// ```
    /// use webserver::http::RequestHead;
    ///
    /// let raw = b"GET /health?verbose=1 HTTP/1.1\r\nHost: x\r\n\r\n";
    /// let head = RequestHead::parse(raw).unwrap();
    ///
    /// assert_eq!(head.path(), "/health");
    /// assert_eq!(head.query_param("verbose"), Some("1"));
    /// assert_eq!(head.header("HOST"), Some("x"));
    /// ```
    pub fn parse(buffer: &[u8]) -> Result<Self, ParseError> {
        let request_str =
            std::str::from_utf8(buffer).map_err(|_| ParseError::InvalidRequestLine)?;

        // Los headers terminan en la primera línea vacía
        let head_str = match request_str.find("\r\n\r\n") {
            Some(end) => &request_str[..end],
            None => request_str.trim_end_matches("\r\n"),
        };

        if head_str.trim().is_empty() {
            return Err(ParseError::EmptyRequest);
        }

        let mut lines = head_str.split("\r\n");
        let request_line = lines.next().ok_or(ParseError::EmptyRequest)?;

        // 1. Request line
        let (method, target, version) = Self::parse_request_line(request_line)?;
        let (path, query_params) = Self::parse_path_and_query(&target);

        // 2. Headers
        let headers = Self::parse_headers(lines)?;

        Ok(RequestHead {
            method,
            target,
            path,
            query_params,
            version,
            headers,
        })
    }

    /// Parsea la request line
    ///
    /// Formato: `GET /path HTTP/1.1`
    fn parse_request_line(line: &str) -> Result<(String, String, Version), ParseError> {
        let parts: Vec<&str> = line.split(' ').collect();

        // Debe tener exactamente 3 partes: METHOD TARGET VERSION
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(ParseError::InvalidRequestLine);
        }

        let method = parts[0];
        if !method.bytes().all(is_token_byte) {
            return Err(ParseError::InvalidMethod(method.to_string()));
        }

        let target = parts[1];
        if !target.starts_with('/') {
            return Err(ParseError::InvalidTarget(target.to_string()));
        }

        let version = match parts[2] {
            "HTTP/1.1" => Version::Http11,
            "HTTP/1.0" => Version::Http10,
            other => return Err(ParseError::InvalidHttpVersion(other.to_string())),
        };

        Ok((method.to_string(), target.to_string(), version))
    }

    /// Separa el path de la query string
    ///
    /// Ejemplo: "/echo?text=hi#top" → ("/echo", {"text": "hi"})
    fn parse_path_and_query(target: &str) -> (String, HashMap<String, String>) {
        let without_fragment = target.split('#').next().unwrap_or(target);
        match without_fragment.split_once('?') {
            Some((path, query)) => (path.to_string(), Self::parse_query_string(query)),
            None => (without_fragment.to_string(), HashMap::new()),
        }
    }

    /// Parsea una query string en un HashMap
    ///
    /// Ejemplo: "num=10&text=hello&fast" → {"num": "10", "text": "hello", "fast": ""}
    fn parse_query_string(query: &str) -> HashMap<String, String> {
        let mut params = HashMap::new();

        for param in query.split('&').filter(|p| !p.is_empty()) {
            match param.split_once('=') {
                Some((key, value)) => {
                    params.insert(url_decode(key), url_decode(value));
                }
                None => {
                    params.insert(url_decode(param), String::new());
                }
            }
        }

        params
    }

    /// Parsea los headers HTTP
    ///
    /// Cada header tiene formato: "Name: Value"
    fn parse_headers<'l>(
        lines: impl Iterator<Item = &'l str>,
    ) -> Result<HashMap<String, String>, ParseError> {
        let mut headers = HashMap::new();

        for (count, line) in lines.enumerate() {
            if count >= MAX_HEADERS {
                return Err(ParseError::TooManyHeaders);
            }

            // Continuaciones (obs-fold) no se aceptan
            if line.starts_with(' ') || line.starts_with('\t') {
                return Err(ParseError::InvalidHeader(line.to_string()));
            }

            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ParseError::InvalidHeader(line.to_string()))?;

            if name.is_empty() || !name.bytes().all(is_token_byte) {
                return Err(ParseError::InvalidHeader(line.to_string()));
            }

            headers.insert(name.to_ascii_lowercase(), value.trim().to_string());
        }

        Ok(headers)
    }

    /// Largo del body declarado
    ///
    /// Sin `Content-Length` el body es vacío. Cualquier `Transfer-Encoding`
    /// distinto de `identity` se rechaza.
    pub fn body_length(&self, max_body: usize) -> Result<usize, ParseError> {
        if let Some(te) = self.header("transfer-encoding") {
            if !te.eq_ignore_ascii_case("identity") {
                return Err(ParseError::UnsupportedTransferEncoding(te.to_string()));
            }
        }

        let Some(raw) = self.header("content-length") else {
            return Ok(0);
        };

        let length: usize = raw
            .parse()
            .map_err(|_| ParseError::InvalidContentLength(raw.to_string()))?;

        if length > max_body {
            return Err(ParseError::BodyTooLarge(length));
        }

        Ok(length)
    }

    /// Indica si el cliente pidió cerrar la conexión
    ///
    /// HTTP/1.1 mantiene la conexión salvo `Connection: close`; HTTP/1.0 solo
    /// la mantiene con `Connection: keep-alive` explícito.
    pub fn wants_close(&self) -> bool {
        let has_token = |token: &str| {
            self.header("connection")
                .map(|value| value.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
                .unwrap_or(false)
        };

        match self.version {
            Version::Http11 => has_token("close"),
            Version::Http10 => !has_token("keep-alive") || has_token("close"),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query_params
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params.get(name).map(|s| s.as_str())
    }

    /// Todos los headers (nombres en minúsculas)
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Busca un header sin distinguir mayúsculas
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }
}

/// Caracteres válidos en un token HTTP (métodos y nombres de header)
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Decodifica `%XX` y `+` de una query string
///
/// Secuencias `%` inválidas se dejan tal cual.
fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(high), Some(low)) => {
                        out.push(high << 4 | low);
                        i += 3;
                        continue;
                    }
                    _ => out.push(b'%'),
                }
            }
            other => out.push(other),
        }
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Valor de un dígito hexadecimal; solo `0-9`, `a-f` y `A-F`
fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Un valor que va a parar a la status line o a un header no puede
/// contener CR, LF ni otros caracteres de control
fn is_header_safe(value: &str) -> bool {
    !value.chars().any(|c| c.is_control())
}

/// Request que recibe un handler
///
/// Vive solo durante una iteración del pipeline: el body apunta al buffer de
/// la conexión y la conexión misma se usa para `send_response`.
pub struct Request<'a> {
    head: RequestHead,
    body: &'a [u8],
    conn: &'a TcpStream,
    peer: SocketAddr,
    server: &'a ServerContext,
    user_data: Option<&'a UserData>,
    keep_alive: bool,
    committed: Cell<bool>,
}

impl<'a> Request<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        head: RequestHead,
        body: &'a [u8],
        conn: &'a TcpStream,
        peer: SocketAddr,
        server: &'a ServerContext,
        user_data: Option<&'a UserData>,
        keep_alive: bool,
    ) -> Self {
        Self {
            head,
            body,
            conn,
            peer,
            server,
            user_data,
            keep_alive,
            committed: Cell::new(false),
        }
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    pub fn method(&self) -> &str {
        self.head.method()
    }

    /// Path sin query string
    pub fn path(&self) -> &str {
        self.head.path()
    }

    pub fn version(&self) -> Version {
        self.head.version()
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.head.query_param(name)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.header(name)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        self.head.headers()
    }

    pub fn body(&self) -> &[u8] {
        self.body
    }

    /// Obtiene el body del request como String
    pub fn body_string(&self) -> Option<String> {
        String::from_utf8(self.body.to_vec()).ok()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Dato de usuario registrado con la ruta, si es del tipo pedido
    pub fn user_data<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.user_data.and_then(|data| data.downcast_ref::<T>())
    }

    /// Snapshot de las métricas del servidor dueño del request
    pub fn metrics(&self) -> MetricsSnapshot {
        self.server.metrics.snapshot()
    }

    /// Handle para pedir el apagado del servidor desde un handler
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.server.shutdown.clone()
    }

    /// Indica si la conexión seguirá abierta después de esta respuesta
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Indica si ya se escribió una respuesta para este request
    pub fn is_committed(&self) -> bool {
        self.committed.get()
    }

    pub(crate) fn include_body(&self) -> bool {
        self.head.method() != "HEAD"
    }

    /// Escribe la respuesta directamente en la conexión
    ///
    /// Solo puede llamarse una vez por request. Devuelve la respuesta escrita
    /// para que el handler pueda retornarla; el pipeline no vuelve a escribir.
    ///
    /// ```ignore
    /// fn hello(req: &Request<'_>) -> HandlerResult {
    ///     req.send_response(200, "OK", "text/plain; charset=utf-8", b"Hello, World\n")
    /// }
    /// ```
    pub fn send_response(
        &self,
        status: u16,
        reason: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<Response, HandlerError> {
        if self.committed.get() {
            return Err(HandlerError::AlreadySent);
        }
        if StatusClass::of(status).is_none() {
            return Err(HandlerError::msg(format!("invalid status code {status}")));
        }
        if !is_header_safe(reason) || !is_header_safe(content_type) {
            return Err(HandlerError::msg(
                "reason and content type must not contain control characters",
            ));
        }

        let response = Response::with_status(status, reason.to_string())
            .with_content_type(content_type.to_string())
            .with_body_bytes(body.to_vec());

        // Una vez intentada la escritura el request queda comprometido
        self.committed.set(true);
        write_response(
            self.conn,
            &response,
            self.keep_alive,
            self.include_body(),
            &self.server.metrics,
        )?;

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\n\r\n";
        let head = RequestHead::parse(raw).unwrap();

        assert_eq!(head.method(), "GET");
        assert_eq!(head.path(), "/");
        assert_eq!(head.version(), Version::Http11);
        assert!(head.query_params().is_empty());
    }

    #[test]
    fn test_parse_arbitrary_method_token() {
        let head = RequestHead::parse(b"PURGE /cache HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(head.method(), "PURGE");
    }

    #[test]
    fn test_parse_with_query_params() {
        let raw = b"GET /echo?num=10&text=hello%20world&flag HTTP/1.0\r\n\r\n";
        let head = RequestHead::parse(raw).unwrap();

        assert_eq!(head.path(), "/echo");
        assert_eq!(head.target(), "/echo?num=10&text=hello%20world&flag");
        assert_eq!(head.query_param("num"), Some("10"));
        assert_eq!(head.query_param("text"), Some("hello world"));
        assert_eq!(head.query_param("flag"), Some(""));
    }

    #[test]
    fn test_fragment_stripped() {
        let head = RequestHead::parse(b"GET /page#top HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(head.path(), "/page");
    }

    #[test]
    fn test_headers_case_insensitive_last_wins() {
        let raw = b"GET / HTTP/1.1\r\nHost: a\r\nX-Trace: 1\r\nx-trace: 2\r\n\r\n";
        let head = RequestHead::parse(raw).unwrap();

        assert_eq!(head.header("host"), Some("a"));
        assert_eq!(head.header("HOST"), Some("a"));
        assert_eq!(head.header("X-Trace"), Some("2"));
        assert_eq!(head.headers().len(), 2);
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("a+b%2Fc"), "a b/c");
        assert_eq!(url_decode("100%"), "100%");
        assert_eq!(url_decode("%zz"), "%zz");
        assert_eq!(url_decode("%41"), "A");
        // Solo dígitos hexadecimales: un signo no cuenta
        assert_eq!(url_decode("%+1"), "%+1");
        assert_eq!(url_decode("%-f"), "%-f");
        assert_eq!(url_decode("%4g"), "%4g");
        assert_eq!(url_decode("%2f%2F"), "//");
    }

    #[test]
    fn test_header_safe_values() {
        assert!(is_header_safe("Created"));
        assert!(is_header_safe("text/plain; charset=utf-8"));
        assert!(!is_header_safe("OK\r\nX-Injected: 1"));
        assert!(!is_header_safe("text/plain\n"));
    }

    #[test]
    fn test_invalid_version() {
        let result = RequestHead::parse(b"GET / HTTP/2.0\r\n\r\n");
        assert!(matches!(result, Err(ParseError::InvalidHttpVersion(_))));
    }

    #[test]
    fn test_empty_request() {
        assert!(matches!(RequestHead::parse(b""), Err(ParseError::EmptyRequest)));
        assert!(matches!(RequestHead::parse(b"\r\n\r\n"), Err(ParseError::EmptyRequest)));
    }

    #[test]
    fn test_invalid_request_line() {
        let result = RequestHead::parse(b"GET\r\n\r\n");
        assert!(matches!(result, Err(ParseError::InvalidRequestLine)));

        let result = RequestHead::parse(b"GET  / HTTP/1.1\r\n\r\n");
        assert!(matches!(result, Err(ParseError::InvalidRequestLine)));
    }

    #[test]
    fn test_invalid_method_and_target() {
        let result = RequestHead::parse(b"G(T / HTTP/1.1\r\n\r\n");
        assert!(matches!(result, Err(ParseError::InvalidMethod(_))));

        let result = RequestHead::parse(b"GET index.html HTTP/1.1\r\n\r\n");
        assert!(matches!(result, Err(ParseError::InvalidTarget(_))));
    }

    #[test]
    fn test_invalid_header() {
        let result = RequestHead::parse(b"GET / HTTP/1.1\r\nno-colon\r\n\r\n");
        assert!(matches!(result, Err(ParseError::InvalidHeader(_))));

        let result = RequestHead::parse(b"GET / HTTP/1.1\r\nA: 1\r\n folded\r\n\r\n");
        assert!(matches!(result, Err(ParseError::InvalidHeader(_))));
    }

    #[test]
    fn test_too_many_headers() {
        let mut raw = String::from("GET / HTTP/1.1\r\n");
        for i in 0..=MAX_HEADERS {
            raw.push_str(&format!("X-H{i}: v\r\n"));
        }
        raw.push_str("\r\n");
        let result = RequestHead::parse(raw.as_bytes());
        assert!(matches!(result, Err(ParseError::TooManyHeaders)));
    }

    #[test]
    fn test_body_length() {
        let head = RequestHead::parse(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\n").unwrap();
        assert_eq!(head.body_length(1024), Ok(5));

        let head = RequestHead::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(head.body_length(1024), Ok(0));

        let head = RequestHead::parse(b"POST / HTTP/1.1\r\nContent-Length: -1\r\n\r\n").unwrap();
        assert!(matches!(
            head.body_length(1024),
            Err(ParseError::InvalidContentLength(_))
        ));

        let head = RequestHead::parse(b"POST / HTTP/1.1\r\nContent-Length: 2048\r\n\r\n").unwrap();
        assert_eq!(head.body_length(1024), Err(ParseError::BodyTooLarge(2048)));
    }

    #[test]
    fn test_chunked_rejected() {
        let head =
            RequestHead::parse(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n").unwrap();
        assert!(matches!(
            head.body_length(1024),
            Err(ParseError::UnsupportedTransferEncoding(_))
        ));
    }

    #[test]
    fn test_wants_close() {
        let head = RequestHead::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(!head.wants_close());

        let head = RequestHead::parse(b"GET / HTTP/1.1\r\nConnection: Close\r\n\r\n").unwrap();
        assert!(head.wants_close());

        let head = RequestHead::parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(head.wants_close());

        let head =
            RequestHead::parse(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n").unwrap();
        assert!(!head.wants_close());
    }

    #[test]
    fn test_body_after_head_ignored_by_parser() {
        let raw = b"POST /echo HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc";
        let head = RequestHead::parse(raw).unwrap();
        assert_eq!(head.path(), "/echo");
        assert_eq!(head.header("content-length"), Some("3"));
    }
}
