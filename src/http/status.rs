//! # Códigos de Estado HTTP
//!
//! Este módulo define los códigos de estado con nombre que usa el servidor
//! internamente y la clasificación por clase (2xx..5xx) que alimenta las
//! métricas. Los handlers pueden devolver cualquier código numérico en
//! `200..=599`; los que no tienen variante aquí viajan como `u16`.

/// Códigos de estado con nombre
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK - La petición fue exitosa
    Ok = 200,

    /// 201 Created
    Created = 201,

    /// 204 No Content - Petición exitosa sin contenido en el body
    NoContent = 204,

    /// 301 Moved Permanently
    MovedPermanently = 301,

    /// 302 Found
    Found = 302,

    /// 304 Not Modified
    NotModified = 304,

    /// 400 Bad Request - Request malformado, demasiado grande o no soportado
    BadRequest = 400,

    /// 404 Not Found - Ninguna ruta coincide
    NotFound = 404,

    /// 405 Method Not Allowed
    MethodNotAllowed = 405,

    /// 500 Internal Server Error - Falta del handler
    InternalServerError = 500,

    /// 501 Not Implemented
    NotImplemented = 501,

    /// 503 Service Unavailable - Servidor sobrecargado o cerrando
    ServiceUnavailable = 503,
}

impl StatusCode {
    /// Convierte el código a su valor numérico
    ///
    /// # Ejemplo
    /// ```
    /// use webserver::http::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// ```
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Retorna el texto de razón (reason phrase) asociado al código
    ///
    /// # Ejemplo
    /// ```
    /// use webserver::http::StatusCode;
    /// assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    /// assert_eq!(StatusCode::NotFound.reason_phrase(), "Not Found");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::NoContent => "No Content",
            StatusCode::MovedPermanently => "Moved Permanently",
            StatusCode::Found => "Found",
            StatusCode::NotModified => "Not Modified",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::ServiceUnavailable => "Service Unavailable",
        }
    }

    /// Busca la variante con nombre para un código numérico
    pub fn from_u16(code: u16) -> Option<Self> {
        let status = match code {
            200 => StatusCode::Ok,
            201 => StatusCode::Created,
            204 => StatusCode::NoContent,
            301 => StatusCode::MovedPermanently,
            302 => StatusCode::Found,
            304 => StatusCode::NotModified,
            400 => StatusCode::BadRequest,
            404 => StatusCode::NotFound,
            405 => StatusCode::MethodNotAllowed,
            500 => StatusCode::InternalServerError,
            501 => StatusCode::NotImplemented,
            503 => StatusCode::ServiceUnavailable,
            _ => return None,
        };
        Some(status)
    }

    pub fn class(&self) -> StatusClass {
        // Todas las variantes están en 200..=599
        StatusClass::of(self.as_u16()).unwrap_or(StatusClass::ServerError)
    }
}

impl std::fmt::Display for StatusCode {
    /// Formato: "200 OK"
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason_phrase())
    }
}

/// Clase de un código de estado (status / 100)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Redirection,
    ClientError,
    ServerError,
}

impl StatusClass {
    /// Clasifica un código numérico; `None` fuera de `200..=599`
    pub fn of(code: u16) -> Option<Self> {
        match code / 100 {
            2 => Some(StatusClass::Success),
            3 => Some(StatusClass::Redirection),
            4 => Some(StatusClass::ClientError),
            5 => Some(StatusClass::ServerError),
            _ => None,
        }
    }
}
