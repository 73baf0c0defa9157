//! Process entry point: wires config, the channel registry, the stream
//! consumer, and the HTTP API together, with graceful shutdown (spec §6).

use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info};
use read_index_engine::api;
use read_index_engine::config::Config;
use read_index_engine::consumer::StreamConsumer;
use read_index_engine::service::IndexService;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            error!("startup failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    let service = Arc::new(IndexService::new(config.window_size));

    let consumer = match StreamConsumer::connect(&config.redis_url, service.clone()).await {
        Ok(consumer) => consumer,
        Err(err) => {
            error!("startup failed: could not connect to redis: {err}");
            return ExitCode::FAILURE;
        }
    };

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let consumer_task = tokio::spawn(async move {
        if let Err(err) = consumer.run(cancel_rx).await {
            error!("stream consumer exited with error: {err}");
        }
    });

    let app = api::router(service);
    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("startup failed: could not bind port {}: {err}", config.port);
            return ExitCode::FAILURE;
        }
    };
    info!("listening on 0.0.0.0:{}", config.port);

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = server.await {
        error!("http server error: {err}");
    }

    info!("http server stopped, signalling stream consumer to stop");
    let _ = cancel_tx.send(true);
    if tokio::time::timeout(std::time::Duration::from_secs(10), consumer_task)
        .await
        .is_err()
    {
        error!("stream consumer did not stop within 10s, exiting anyway");
    }

    ExitCode::SUCCESS
}

/// Resolves on SIGINT or SIGTERM, matching the 10s graceful-shutdown
/// deadline the reference service's `main` applied to its HTTP listener.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    let terminate = async {
        signal(SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
