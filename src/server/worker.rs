//! # Pool de Workers
//! src/server/worker.rs
//!
//! N threads simétricos que toman conexiones de la cola compartida y corren
//! el pipeline sobre cada una hasta cerrarla. Un worker termina cuando la
//! cola se cierra.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::connection::serve_connection;
use super::ServerContext;
use crate::dispatch::DispatchQueue;
use crate::error::ServerError;

/// Lanza `count` workers con nombre `ws-worker-{i}`
///
/// Si un thread no se puede crear, devuelve el error junto con los que sí
/// arrancaron para que el llamador los detenga.
pub(crate) fn spawn_workers(
    count: usize,
    ctx: &Arc<ServerContext>,
    queue: &Arc<DispatchQueue>,
) -> Result<Vec<JoinHandle<()>>, (ServerError, Vec<JoinHandle<()>>)> {
    let mut handles = Vec::with_capacity(count);

    for id in 0..count {
        let ctx = Arc::clone(ctx);
        let queue = Arc::clone(queue);
        let spawned = thread::Builder::new()
            .name(format!("ws-worker-{id}"))
            .spawn(move || worker_loop(id, &ctx, &queue));

        match spawned {
            Ok(handle) => handles.push(handle),
            Err(source) => {
                return Err((
                    ServerError::Spawn {
                        what: "worker",
                        source,
                    },
                    handles,
                ))
            }
        }
    }

    Ok(handles)
}

fn worker_loop(id: usize, ctx: &ServerContext, queue: &DispatchQueue) {
    let logger = ctx.config.logger();

    while let Some(job) = queue.dequeue() {
        let peer = job.peer();
        logger.debug(format_args!(
            "worker {id}: serving {peer} (queued {:?})",
            job.waited()
        ));

        let reason = serve_connection(ctx, job.into_stream(), peer);
        logger.debug(format_args!("worker {id}: closed {peer}: {reason}"));
    }

    logger.debug(format_args!("worker {id}: exiting"));
}
