//! # Handlers del Demo
//! src/handlers.rs
//!
//! Rutas que registra el binario demo:
//!
//! | Ruta          | Respuesta                                   |
//! |---------------|---------------------------------------------|
//! | `GET /`       | `Hello, World\n`                            |
//! | `GET /health` | `OK\n`                                      |
//! | `GET /metrics`| contadores en texto (`?format=json` → JSON) |

use crate::error::RouteError;
use crate::http::{Request, Response, StatusCode};
use crate::router::HandlerResult;
use crate::server::Server;

/// GET /
pub fn hello(_req: &Request<'_>) -> HandlerResult {
    Ok(Response::text(StatusCode::Ok, "Hello, World\n"))
}

/// GET /health
pub fn health(_req: &Request<'_>) -> HandlerResult {
    Ok(Response::text(StatusCode::Ok, "OK\n"))
}

/// GET /metrics
///
/// Una línea `clave: valor` por contador. Con `?format=json` responde el
/// mismo snapshot como objeto JSON.
pub fn metrics(req: &Request<'_>) -> HandlerResult {
    let snapshot = req.metrics();
    match req.query_param("format") {
        Some("json") => Ok(Response::json(&snapshot.to_json())),
        _ => Ok(Response::text(StatusCode::Ok, snapshot.to_string())),
    }
}

/// Registra las rutas del demo en un servidor
pub fn register_demo_routes(server: &Server) -> Result<(), RouteError> {
    server.add_route("GET", "/", hello, None)?;
    server.add_route("GET", "/health", health, None)?;
    server.add_route("GET", "/metrics", metrics, None)?;
    Ok(())
}
