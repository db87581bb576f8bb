//! # Módulo HTTP
//! src/http/mod.rs
//!
//! Protocolo HTTP/1.1 implementado a mano, sin librerías de alto nivel:
//!
//! - Parsing del head de un request y vista [`Request`] para handlers
//! - Lectura incremental desde el socket con límites y timeouts
//! - Construcción de responses HTTP/1.1
//! - Códigos de estado y su clasificación
//!
//! ### Formato de Request
//!
//! ```text
//! GET /path?query=value HTTP/1.1\r\n
//! Header-Name: Header-Value\r\n
//! \r\n
//! ```
//!
//! ### Formato de Response
//!
//! ```text
//! HTTP/1.1 200 OK\r\n
//! Content-Type: text/plain; charset=utf-8\r\n
//! Content-Length: 13\r\n
//! Connection: keep-alive\r\n
//! Server: webserver/0.1.0\r\n
//! \r\n
//! Hello, World
//! ```

pub mod reader; // Lectura incremental desde el socket
pub mod request; // Parsing de HTTP requests
pub mod response; // Construcción de HTTP responses
pub mod status; // Códigos de estado HTTP

// Permite usar `http::Request` en vez de `http::request::Request`
pub use reader::{HeadRead, ReadError, RequestReader, MAX_BODY_BYTES, MAX_HEAD_BYTES};
pub use request::{ParseError, Request, RequestHead, Version};
pub use response::{Response, TEXT_PLAIN};
pub use status::{StatusClass, StatusCode};
