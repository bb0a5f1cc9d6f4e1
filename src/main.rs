mod config;
mod engine;
mod error;
mod recognizer;
mod server;
mod types;

use crate::config::Config;
use crate::engine::alpr::AlprEngine;
use crate::recognizer::Recognizer;
use crate::server::Limits;
use env_logger::Env;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting plate-reader");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    // engine is loaded and tuned before the listener is bound
    let recognizer = Arc::new(Recognizer::new(Box::new(AlprEngine::new(
        config.alpr_binary.clone(),
    ))));
    let init = {
        let recognizer = recognizer.clone();
        let engine_config = config.engine.clone();
        let top_n = config.top_n;
        tokio::task::spawn_blocking(move || {
            recognizer.initialize(engine_config)?;
            recognizer.set_top_n(top_n)
        })
        .await
    };
    match init {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("Unable to initialize recognition engine: {}", e);
            process::exit(1);
        }
        Err(e) => {
            error!("Engine initialization task failed: {}", e);
            process::exit(1);
        }
    }

    let limits = Limits {
        max_payload_bytes: config.max_payload_bytes,
        request_timeout: config.request_timeout,
    };
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let (addr, server) = match server::bind(recognizer.clone(), limits, addr, async move {
        stop_rx.await.ok();
    }) {
        Ok(bound) => bound,
        Err(e) => {
            error!("Unable to listen on {}: {}", addr, e);
            process::exit(1);
        }
    };
    info!("Listening on {}", addr);
    let mut server = tokio::spawn(server);

    let drain_started = tokio::select! {
        result = &mut server => {
            if let Err(e) = result {
                error!("Server task failed: {}", e);
            }
            Instant::now()
        }
        _ = shutdown_signal() => {
            info!("Shutting down; draining for up to {:?}", config.drain_timeout);
            let started = Instant::now();
            let _ = stop_tx.send(());
            match tokio::time::timeout(config.drain_timeout, &mut server).await {
                Ok(Ok(())) => info!("All connections drained"),
                Ok(Err(e)) => error!("Server task failed: {}", e),
                Err(_) => warn!("Drain timeout elapsed with requests still in flight"),
            }
            started
        }
    };

    let remaining = config.drain_timeout.saturating_sub(drain_started.elapsed());
    if !server::release_engine(recognizer, remaining).await {
        // blocking-pool threads would otherwise hold the runtime open
        warn!("Engine still busy after drain timeout; exiting without unloading");
        process::exit(0);
    }
    info!("Exiting main");
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Unable to listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
