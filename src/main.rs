use std::net::SocketAddr;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::oneshot;

mod api;
mod ban_store;
mod chain;
mod config;
mod coordinator;
mod crypto;
mod error;
mod round;
mod setup;

use crate::coordinator::spawn_ticker;

/// How often the background ticker evaluates phase timeouts and round
/// scheduling.
const TICKER_PERIOD: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let coordinator = setup::setup().await?;

    // make sure an InputRegistration round is always open, same as the
    // ticker will keep doing from here on.
    coordinator.current_input_registering_round().await;

    spawn_ticker(coordinator.clone(), TICKER_PERIOD);

    let app = api::build_router(coordinator);

    // Set up a oneshot channel to handle shutdown signal
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut term_signal = signal(SignalKind::terminate())
            .map_err(|e| eprintln!("failed to install TERM signal handler: {e}"))
            .unwrap();
        let mut int_signal = signal(SignalKind::interrupt())
            .map_err(|e| {
                eprintln!("failed to install INT signal handler: {e}");
            })
            .unwrap();

        tokio::select! {
            _ = term_signal.recv() => {
                println!("Received SIGTERM");
            },
            _ = int_signal.recv() => {
                println!("Received SIGINT");
            },
        }

        let _ = tx.send(());
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], 3001));
    println!("coordinator listening on {}", addr);

    let server = axum::Server::bind(&addr).serve(app.into_make_service());

    let graceful = server.with_graceful_shutdown(async {
        let _ = rx.await;
    });

    if let Err(e) = graceful.await {
        eprintln!("shutdown error: {e}");
    }

    println!("Graceful shutdown complete");

    Ok(())
}
