//! # Collector de Métricas
//! src/metrics/collector.rs
//!
//! Contadores del servidor, compartidos por el acceptor y todos los workers.
//! Cada campo es un `AtomicU64` independiente: no hay locks y ningún
//! incremento se pierde bajo concurrencia.
//!
//! Todos los contadores son monótonos salvo `queue_len` (instantáneo) y
//! `queue_peak` (máximo observado, nunca baja).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::http::StatusClass;

/// Collector de métricas thread-safe
#[derive(Debug, Default)]
pub struct MetricsCollector {
    accepted: AtomicU64,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    dropped_new: AtomicU64,
    dropped_oldest: AtomicU64,
    bytes_sent: AtomicU64,
    resp_2xx: AtomicU64,
    resp_3xx: AtomicU64,
    resp_4xx: AtomicU64,
    resp_5xx: AtomicU64,
    queue_len: AtomicU64,
    queue_peak: AtomicU64,

    /// Workers configurados (fijo)
    threads: u64,
}

impl MetricsCollector {
    /// Crea un nuevo collector para un pool de `threads` workers
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads as u64,
            ..Self::default()
        }
    }

    /// Una conexión aceptada por el acceptor
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Un job entró a la cola; `queue_len` es el largo resultante
    pub fn record_enqueued(&self, queue_len: usize) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.set_queue_len(queue_len);
    }

    /// Un worker tomó un job; `queue_len` es el largo resultante
    pub fn record_dequeued(&self, queue_len: usize) {
        self.dequeued.fetch_add(1, Ordering::Relaxed);
        self.set_queue_len(queue_len);
    }

    /// Conexión nueva rechazada con la cola llena (drop-new)
    pub fn record_dropped_new(&self) {
        self.dropped_new.fetch_add(1, Ordering::Relaxed);
    }

    /// Job más antiguo descartado para hacer lugar (drop-oldest)
    pub fn record_dropped_oldest(&self) {
        self.dropped_oldest.fetch_add(1, Ordering::Relaxed);
    }

    /// Un job nuevo ocupó el lugar de uno descartado (drop-oldest)
    ///
    /// El lugar ya se contó en `enqueued` cuando entró el descartado, así que
    /// solo se actualiza el largo. Cada conexión aceptada termina en uno solo
    /// de `enqueued`, `dropped_new` o `dropped_oldest`.
    pub fn record_replaced(&self, queue_len: usize) {
        self.set_queue_len(queue_len);
    }

    /// Actualiza el largo instantáneo de la cola y su máximo
    pub fn set_queue_len(&self, queue_len: usize) {
        let len = queue_len as u64;
        self.queue_len.store(len, Ordering::Relaxed);
        self.queue_peak.fetch_max(len, Ordering::Relaxed);
    }

    /// Una respuesta escrita completa en el socket
    ///
    /// Incrementa exactamente un contador de clase según `status / 100`.
    /// Códigos fuera de `200..=599` solo suman bytes.
    pub fn record_response(&self, status: u16, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);

        let counter = match StatusClass::of(status) {
            Some(StatusClass::Success) => &self.resp_2xx,
            Some(StatusClass::Redirection) => &self.resp_3xx,
            Some(StatusClass::ClientError) => &self.resp_4xx,
            Some(StatusClass::ServerError) => &self.resp_5xx,
            None => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Obtiene un snapshot de las métricas
    ///
    /// Cada campo se lee atómicamente; el conjunto no es una transacción.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            accepted: load(&self.accepted),
            enqueued: load(&self.enqueued),
            dequeued: load(&self.dequeued),
            dropped_new: load(&self.dropped_new),
            dropped_oldest: load(&self.dropped_oldest),
            bytes_sent: load(&self.bytes_sent),
            resp_2xx: load(&self.resp_2xx),
            resp_3xx: load(&self.resp_3xx),
            resp_4xx: load(&self.resp_4xx),
            resp_5xx: load(&self.resp_5xx),
            queue_len: load(&self.queue_len),
            queue_peak: load(&self.queue_peak),
            threads: self.threads,
        }
    }
}

/// Snapshot de métricas (para uso externo)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub accepted: u64,
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped_new: u64,
    pub dropped_oldest: u64,
    pub bytes_sent: u64,
    pub resp_2xx: u64,
    pub resp_3xx: u64,
    pub resp_4xx: u64,
    pub resp_5xx: u64,
    pub queue_len: u64,
    pub queue_peak: u64,
    pub threads: u64,
}

impl MetricsSnapshot {
    /// Pares `(clave, valor)` en el orden estable del formato de texto
    pub fn fields(&self) -> [(&'static str, u64); 13] {
        [
            ("accepted", self.accepted),
            ("enqueued", self.enqueued),
            ("dequeued", self.dequeued),
            ("dropped_new", self.dropped_new),
            ("dropped_oldest", self.dropped_oldest),
            ("bytes_sent", self.bytes_sent),
            ("resp_2xx", self.resp_2xx),
            ("resp_3xx", self.resp_3xx),
            ("resp_4xx", self.resp_4xx),
            ("resp_5xx", self.resp_5xx),
            ("queue_len", self.queue_len),
            ("queue_peak", self.queue_peak),
            ("threads", self.threads),
        ]
    }

    /// Obtiene las métricas en formato JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }

    /// Conexiones aceptadas que todavía no tienen destino (encolada o
    /// descartada); 0 una vez que el acceptor terminó de ofrecerlas
    ///
    /// `None` si los destinos superan a las aceptadas: la contabilidad está rota.
    pub fn unaccounted(&self) -> Option<u64> {
        self.enqueued
            .checked_add(self.dropped_new)
            .and_then(|n| n.checked_add(self.dropped_oldest))
            .and_then(|settled| self.accepted.checked_sub(settled))
    }
}

impl fmt::Display for MetricsSnapshot {
    /// Una línea `clave: valor` por contador
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in self.fields() {
            writeln!(f, "{key}: {value}")?;
        }
        Ok(())
    }
}
