//! # Despacho de Conexiones
//! src/dispatch/mod.rs
//!
//! Entrega de conexiones aceptadas a los workers:
//!
//! - `job`: la conexión en tránsito, con su instante de aceptación
//! - `queue`: la cola acotada con política de sobrecarga

pub mod job;
pub mod queue;

pub use job::ConnectionJob;
pub use queue::{Admission, DispatchQueue};
