//! # Cola de Despacho
//! src/dispatch/queue.rs
//!
//! Cola FIFO acotada de [`ConnectionJob`] entre el acceptor y los workers.
//!
//! Cuando la cola está llena, la política decide:
//!
//! - `Block`: el acceptor espera (sin busy-polling) a que se libere un lugar
//!   o a que se cierre la cola.
//! - `DropNew`: la conexión nueva se cierra sin encolarse.
//! - `DropOldest`: se cierra la conexión al frente de la cola y la nueva entra
//!   al final, ocupando el lugar ya contado en `enqueued`. Solo sube
//!   `dropped_oldest`, así `enqueued + dropped_new + dropped_oldest` nunca
//!   supera a `accepted`.
//!
//! Las métricas de la cola se actualizan bajo el mismo lock que la modifica,
//! así `queue_len` siempre refleja el largo después de cada operación.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use super::ConnectionJob;
use crate::config::QueuePolicy;
use crate::metrics::MetricsCollector;

/// Resultado de ofrecer un job a la cola
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// El job quedó encolado
    Enqueued,

    /// Cola llena con `DropNew`: el job ofrecido se cerró
    DroppedNew,

    /// Cola llena con `DropOldest`: se cerró el más antiguo y el ofrecido entró
    DroppedOldest,

    /// La cola está cerrada (apagado): el job ofrecido se cerró
    Closed,
}

struct QueueState {
    jobs: VecDeque<ConnectionJob>,
    closed: bool,
}

/// Cola acotada thread-safe
pub struct DispatchQueue {
    state: Mutex<QueueState>,

    /// Avisa a los workers que hay jobs (o que la cola se cerró)
    not_empty: Condvar,

    /// Avisa al acceptor bloqueado que hay lugar (o que la cola se cerró)
    not_full: Condvar,

    capacity: usize,
    policy: QueuePolicy,
    metrics: Arc<MetricsCollector>,
}

impl DispatchQueue {
    /// Crea una nueva cola con capacidad máxima
    pub fn new(capacity: usize, policy: QueuePolicy, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::with_capacity(capacity.min(4096)),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
            policy,
            metrics,
        }
    }

    // Un panic con el lock tomado no deja la cola inconsistente: cada
    // operación deja el estado válido antes de soltarlo
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ofrece un job recién aceptado
    ///
    /// Con la cola llena aplica la política configurada. Los jobs descartados
    /// se sueltan (y su socket se cierra) fuera del lock.
    pub fn offer(&self, job: ConnectionJob) -> Admission {
        let mut state = self.lock();

        if self.policy == QueuePolicy::Block {
            while state.jobs.len() >= self.capacity && !state.closed {
                state = self
                    .not_full
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        if state.closed {
            drop(state);
            drop(job);
            return Admission::Closed;
        }

        let mut evicted = None;
        if state.jobs.len() >= self.capacity {
            match self.policy {
                QueuePolicy::DropNew => {
                    self.metrics.record_dropped_new();
                    drop(state);
                    drop(job);
                    return Admission::DroppedNew;
                }
                QueuePolicy::DropOldest => {
                    evicted = state.jobs.pop_front();
                    self.metrics.record_dropped_oldest();
                }
                // Block ya esperó hasta tener lugar
                QueuePolicy::Block => {}
            }
        }

        state.jobs.push_back(job);
        if evicted.is_some() {
            self.metrics.record_replaced(state.jobs.len());
        } else {
            self.metrics.record_enqueued(state.jobs.len());
        }
        drop(state);
        self.not_empty.notify_one();

        match evicted {
            Some(old) => {
                drop(old);
                Admission::DroppedOldest
            }
            None => Admission::Enqueued,
        }
    }

    /// Toma el próximo job, bloqueando mientras la cola esté vacía
    ///
    /// Devuelve `None` cuando la cola se cerró: el worker debe terminar.
    pub fn dequeue(&self) -> Option<ConnectionJob> {
        let mut state = self.lock();

        loop {
            if state.closed {
                return None;
            }
            if let Some(job) = state.jobs.pop_front() {
                self.metrics.record_dequeued(state.jobs.len());
                drop(state);
                self.not_full.notify_one();
                return Some(job);
            }

            // Esperar a que haya jobs
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Cierra la cola y abandona los jobs pendientes
    ///
    /// Despierta a todos los workers y al acceptor bloqueado. Devuelve cuántos
    /// jobs se cerraron sin atender. Llamarla de nuevo no tiene efecto.
    pub fn close(&self) -> usize {
        let abandoned: Vec<ConnectionJob> = {
            let mut state = self.lock();
            state.closed = true;
            let jobs = state.jobs.drain(..).collect();
            self.metrics.set_queue_len(0);
            jobs
        };

        self.not_empty.notify_all();
        self.not_full.notify_all();

        // Soltar los jobs cierra sus sockets
        abandoned.len()
    }

    /// Retorna el tamaño actual de la cola
    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    /// Verifica si la cola está vacía
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Direcciones de los clientes encolados, del frente al final
    pub fn peers(&self) -> Vec<std::net::SocketAddr> {
        self.lock().jobs.iter().map(ConnectionJob::peer).collect()
    }
}
