//! # Sistema de Routing
//! src/router/mod.rs
//!
//! Tabla de rutas que mapea `(método, path)` a un handler.
//!
//! ## Arquitectura
//!
//! ```text
//! Request → Router::lookup(method, path) → Handler → Response
//! ```
//!
//! La coincidencia es exacta y sensible a mayúsculas tanto en el método como
//! en el path; la query string no participa. Si no hay ruta, el servidor
//! responde 404 sin invocar ningún handler.
//!
//! La tabla se llena antes de `run` y queda de solo lectura mientras el
//! servidor atiende, por eso los workers la comparten sin locks.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{HandlerError, RouteError};
use crate::http::{Request, Response};

/// Resultado de un handler
pub type HandlerResult = Result<Response, HandlerError>;

/// Handler de una ruta
///
/// Puede ser llamado en paralelo desde varios workers.
pub type Handler = Arc<dyn Fn(&Request<'_>) -> HandlerResult + Send + Sync>;

/// Dato opaco asociado a una ruta
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Una ruta registrada
#[derive(Clone)]
pub struct Route {
    method: String,
    path: String,
    handler: Handler,
    user_data: Option<UserData>,
}

impl Route {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub fn user_data(&self) -> Option<&UserData> {
        self.user_data.as_ref()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("user_data", &self.user_data.is_some())
            .finish()
    }
}

/// Router que mapea (método, path) a handlers
#[derive(Clone, Default, Debug)]
pub struct Router {
    /// método → path → ruta
    routes: HashMap<String, HashMap<String, Route>>,
}

impl Router {
    /// Crea un nuevo router vacío
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra una ruta con su handler
    ///
    /// Si ya existe una ruta para el mismo `(método, path)` se rechaza la
    /// nueva y se conserva la primera.
    ///
    /// # Ejemplo
    /// ```
    /// use webserver::http::{Response, StatusCode};
    /// use webserver::router::Router;
    ///
    /// let mut router = Router::new();
    /// router
    ///     .register("GET", "/hello", |_req| Ok(Response::text(StatusCode::Ok, "hi")), None)
    ///     .unwrap();
    ///
    /// assert!(router.lookup("GET", "/hello").is_some());
    /// assert!(router.lookup("POST", "/hello").is_none());
    /// ```
    pub fn register<F>(
        &mut self,
        method: &str,
        path: &str,
        handler: F,
        user_data: Option<UserData>,
    ) -> Result<(), RouteError>
    where
        F: Fn(&Request<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        validate_method(method)?;
        validate_path(path)?;

        let by_path = self.routes.entry(method.to_string()).or_default();
        if by_path.contains_key(path) {
            return Err(RouteError::Duplicate {
                method: method.to_string(),
                path: path.to_string(),
            });
        }

        by_path.insert(
            path.to_string(),
            Route {
                method: method.to_string(),
                path: path.to_string(),
                handler: Arc::new(handler),
                user_data,
            },
        );
        Ok(())
    }

    /// Busca la ruta exacta para un método y path
    pub fn lookup(&self, method: &str, path: &str) -> Option<&Route> {
        self.routes.get(method)?.get(path)
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rutas registradas, ordenadas por path y método
    pub fn routes(&self) -> Vec<&Route> {
        let mut routes: Vec<&Route> = self.routes.values().flat_map(HashMap::values).collect();
        routes.sort_by(|a, b| (&a.path, &a.method).cmp(&(&b.path, &b.method)));
        routes
    }
}

fn validate_method(method: &str) -> Result<(), RouteError> {
    let valid = !method.is_empty()
        && method
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b));
    if !valid {
        return Err(RouteError::InvalidMethod(method.to_string()));
    }
    Ok(())
}

fn validate_path(path: &str) -> Result<(), RouteError> {
    let valid = path.starts_with('/')
        && !path
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '?' || c == '#');
    if !valid {
        return Err(RouteError::InvalidPath(path.to_string()));
    }
    Ok(())
}
