//! # Pedido de Apagado
//! src/server/shutdown.rs
//!
//! [`ShutdownHandle`] es el único mecanismo para detener un servidor en
//! marcha. Es un flag atómico compartido: `request` solo hace un `swap`, sin
//! locks ni asignaciones, por lo que puede llamarse desde un handler de
//! señales.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Handle clonable para pedir el apagado del servidor
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pide el apagado
    ///
    /// Devuelve `true` solo para la primera llamada; las siguientes no tienen
    /// efecto.
    pub fn request(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
