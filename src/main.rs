//! # webserver - Entry Point
//! src/main.rs
//!
//! Binario demo: lee la configuración de la línea de comandos (o variables
//! `WS_*`), registra `/`, `/health` y `/metrics` y atiende hasta recibir
//! SIGINT o SIGTERM.
//!
//! Códigos de salida: 0 apagado limpio, 1 error en tiempo de ejecución,
//! 2 argumentos inválidos.

use std::process::ExitCode;
use std::sync::OnceLock;

use clap::Parser;

use webserver::config::Cli;
use webserver::handlers::register_demo_routes;
use webserver::logging::init_tracing;
use webserver::server::{Server, ShutdownHandle};

/// Handle que usan los handlers de señales
static SHUTDOWN: OnceLock<ShutdownHandle> = OnceLock::new();

extern "C" fn on_signal(_sig: libc::c_int) {
    // Solo un swap atómico: seguro dentro de un handler de señales
    if let Some(handle) = SHUTDOWN.get() {
        handle.request();
    }
}

fn install_signal_handlers(handle: ShutdownHandle) {
    let _ = SHUTDOWN.set(handle);
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    // SAFETY: `on_signal` solo lee un OnceLock ya inicializado y hace un swap
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
}

fn main() -> ExitCode {
    // Con argumentos inválidos clap imprime el uso y sale con 2
    let cli = Cli::parse();
    init_tracing(cli.log_level);

    let server = match Server::new(cli.to_options()) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("invalid configuration: {e}");
            return ExitCode::from(2);
        }
    };

    Cli::print_summary(server.config());

    if let Err(e) = register_demo_routes(&server) {
        tracing::error!("failed to register routes: {e}");
        return ExitCode::FAILURE;
    }

    install_signal_handlers(server.shutdown_handle());

    match server.run() {
        Ok(()) => {
            let metrics = server.metrics();
            tracing::info!(
                accepted = metrics.accepted,
                dropped_new = metrics.dropped_new,
                dropped_oldest = metrics.dropped_oldest,
                "server stopped cleanly"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("💥 {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
