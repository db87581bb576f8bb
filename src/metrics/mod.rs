//! # Sistema de Métricas
//! src/metrics/mod.rs
//!
//! Este módulo implementa los contadores del servidor:
//! - Conexiones aceptadas, encoladas, atendidas y descartadas por política
//! - Bytes enviados y respuestas por clase (2xx..5xx)
//! - Largo actual y máximo de la cola de despacho

pub mod collector;

pub use collector::{MetricsCollector, MetricsSnapshot};
