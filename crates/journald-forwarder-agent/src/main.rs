// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::future::Future;
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use journald_forwarder::{
    config::{ForwarderConfig, PipelineConfig, ENV_PREFIX},
    sink::{HttpSink, Sink, StdoutSink},
    source::JournalctlSource,
    Forwarder, ForwarderHandle,
};

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var(format!("{ENV_PREFIX}LOG_LEVEL"))
        .map(|val| val.trim().to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,reqwest=off,{log_level}");
    let filter = EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    debug!("Logging subsystem enabled");

    let config = match ForwarderConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    debug!(?config, "Configuration loaded");

    let source = JournalctlSource::new(config.journalctl());
    match config.http_sink() {
        Some(http) => {
            info!(endpoint = %http.endpoint, batch_size = http.batch_size, "Forwarding to HTTP endpoint");
            match HttpSink::new(http) {
                Ok(sink) => run(config.pipeline(), source, sink).await,
                Err(e) => {
                    error!("Error creating HTTP sink: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        None => {
            info!("Forwarding to stdout");
            run(config.pipeline(), source, StdoutSink::stdout()).await
        }
    }
}

async fn run<K: Sink + 'static>(
    pipeline: PipelineConfig,
    source: JournalctlSource,
    sink: K,
) -> ExitCode {
    let forwarder = match Forwarder::new(pipeline, source, sink) {
        Ok(forwarder) => forwarder,
        Err(e) => {
            error!("Invalid pipeline configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut handle = match forwarder.start().await {
        Ok(handle) => handle,
        Err(e) => {
            error!("Error loading checkpoint: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut failed = watch(&mut handle, shutdown_signal()).await;

    handle.stop();
    if let Err(e) = handle.wait().await {
        error!("Error while stopping forwarder: {e}");
        failed = true;
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Drains reported errors until `shutdown` resolves or a fatal error arrives. Returns whether the
/// forwarder failed.
async fn watch(handle: &mut ForwarderHandle, shutdown: impl Future<Output = ()>) -> bool {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => return false,
            reported = handle.next_error() => match reported {
                // Non-fatal errors are logged where they are reported.
                Some(e) if !e.is_fatal() => {}
                Some(e) => {
                    error!("Forwarder failed: {e}");
                    return true;
                }
                None => return false,
            },
        }
    }
}

/// Resolves on SIGINT or SIGTERM. Both handlers are installed on the first poll and stay
/// installed until the future is dropped.
async fn shutdown_signal() {
    let terminate = terminate();
    tokio::pin!(terminate);
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Received interrupt, shutting down"),
            Err(e) => {
                error!("Unable to listen for interrupts: {e}");
                terminate.await;
            }
        },
        () = &mut terminate => {}
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
            info!("Received SIGTERM, shutting down");
        }
        Err(e) => {
            error!("Unable to listen for SIGTERM: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
