//! # Construcción de Respuestas HTTP
//!
//! Este módulo proporciona una API para construir respuestas HTTP/1.1
//! de forma programática y convertirlas a bytes para enviar al cliente.
//!
//! ## Formato de una respuesta
//!
//! ```text
//! HTTP/1.1 200 OK\r\n
//! Content-Type: text/plain; charset=utf-8\r\n
//! Content-Length: 3\r\n
//! Connection: keep-alive\r\n
//! Server: webserver/0.1\r\n
//! \r\n
//! OK\n
//! ```
//!
//! `Content-Length` y `Connection` los calcula el servidor al serializar;
//! los handlers no pueden sobrescribirlos.
//!
//! ## Ejemplo de uso
//!
//! ```
//! use webserver::http::{Response, StatusCode};
//!
//! let response = Response::new(StatusCode::Ok)
//!     .with_header("X-Custom", "1")
//!     .with_body("Hello");
//!
//! let bytes = response.to_bytes(false, true);
//! assert!(bytes.starts_with(b"HTTP/1.1 200 OK\r\n"));
//! ```

use std::borrow::Cow;

use super::StatusCode;

/// Content-Type por defecto
pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Valor del header `Server`
pub const SERVER_NAME: &str = concat!("webserver/", env!("CARGO_PKG_VERSION"));

/// Headers que calcula el servidor y que se ignoran si los pone el handler
const MANAGED_HEADERS: [&str; 3] = ["content-length", "connection", "transfer-encoding"];

/// Representa una respuesta HTTP completa
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Código de estado numérico
    status: u16,

    /// Reason phrase que acompaña al código
    reason: Cow<'static, str>,

    /// Tipo MIME del body
    content_type: Cow<'static, str>,

    /// Headers adicionales, en orden de inserción
    headers: Vec<(String, String)>,

    /// Cuerpo de la respuesta (puede ser vacío)
    body: Vec<u8>,
}

impl Response {
    /// Crea una respuesta vacía con un código con nombre
    pub fn new(status: StatusCode) -> Self {
        Self::with_status(status.as_u16(), status.reason_phrase())
    }

    /// Crea una respuesta vacía con un código y reason arbitrarios
    pub fn with_status(status: u16, reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            status,
            reason: reason.into(),
            content_type: Cow::Borrowed(TEXT_PLAIN),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Respuesta `text/plain`
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self::new(status).with_body_bytes(body.into().into_bytes())
    }

    /// Crea una respuesta JSON exitosa (200 OK)
    pub fn json(body: &str) -> Self {
        Self::new(StatusCode::Ok)
            .with_content_type("application/json")
            .with_body(body)
    }

    /// Crea una respuesta de error con mensaje JSON
    ///
    /// Formato del JSON: `{"error": "mensaje"}`
    ///
    /// # Ejemplo
    /// ```
    /// use webserver::http::{Response, StatusCode};
    ///
    /// let response = Response::error(StatusCode::BadRequest, "bad \"header\"");
    /// assert_eq!(response.body(), br#"{"error":"bad \"header\""}"#);
    /// ```
    pub fn error(status: StatusCode, message: &str) -> Self {
        let body = serde_json::json!({ "error": message }).to_string();
        Self::new(status)
            .with_content_type("application/json")
            .with_body_bytes(body.into_bytes())
    }

    pub fn with_content_type(mut self, content_type: impl Into<Cow<'static, str>>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Agrega un header a la respuesta (versión builder)
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.add_header(name, value);
        self
    }

    /// Agrega un header a una respuesta existente
    ///
    /// `Content-Type` reemplaza el tipo del body; los headers que calcula el
    /// servidor se ignoran. Un header repetido reemplaza al anterior.
    pub fn add_header(&mut self, name: &str, value: &str) {
        let lower = name.to_ascii_lowercase();
        if MANAGED_HEADERS.contains(&lower.as_str()) {
            return;
        }
        if lower == "content-type" {
            self.content_type = Cow::Owned(value.to_string());
            return;
        }
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some(slot) => slot.1 = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    /// Establece el cuerpo de la respuesta desde un string
    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.as_bytes().to_vec();
        self
    }

    /// Establece el cuerpo de la respuesta desde bytes
    pub fn with_body_bytes(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Convierte la respuesta a bytes listos para enviar por el socket
    ///
    /// - Status line: `HTTP/1.1 200 OK\r\n`
    /// - Headers fijos: `Content-Type`, `Content-Length`, `Connection`, `Server`
    /// - Headers adicionales del handler
    /// - Línea vacía y body (omitido si `include_body` es false, p.ej. HEAD)
    pub fn to_bytes(&self, keep_alive: bool, include_body: bool) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: {}\r\nServer: {}\r\n",
            self.status,
            self.reason,
            self.content_type,
            self.body.len(),
            if keep_alive { "keep-alive" } else { "close" },
            SERVER_NAME,
        );
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        let mut result = head.into_bytes();
        if include_body {
            result.extend_from_slice(&self.body);
        }
        result
    }

    /// Código de estado numérico
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Headers adicionales (sin los calculados por el servidor)
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Valor que se envía en `Content-Length`
    pub fn content_length(&self) -> usize {
        self.body.len()
    }
}
