//! # Whisper Transcription Backend - Main Application Entry Point
//!
//! Local HTTP service that accepts short audio clips and returns their
//! transcription, tuned for low latency on a single GPU-equipped machine.
//!
//! ## Application Architecture:
//! - **config**: Configuration (TOML file + environment variables)
//! - **device**: Compute device selection and GPU telemetry
//! - **audio**: Clip decoding and silence gating
//! - **transcription**: Whisper model handle and the request pipeline engine
//! - **handlers**: The two transcription ingress variants
//! - **health**: Live status/capability snapshot
//! - **state / middleware / error**: Shared state, request metrics, HTTP
//!   error mapping
//!
//! The model loads once at startup; the process refuses to serve until it is
//! ready. Every request after that runs against the same shared handle.

mod audio;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod middleware;
mod state;
mod transcription;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use config::AppConfig;
use device::DeviceManager;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::{ModelSize, TranscriptionEngine, WhisperModel};

/// Global shutdown signal, set by the signal-handler task and polled by the
/// shutdown future racing the server.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting whisper-transcribe-backend v{}", env!("CARGO_PKG_VERSION"));

    let model_size: ModelSize = config
        .model
        .whisper_model
        .parse()
        .context("Invalid model size in configuration")?;
    let device = device::create_device_from_string(&config.model.device);

    info!(
        model = %model_size,
        device = DeviceManager::device_kind(&device),
        "Loading speech-recognition model"
    );

    let model = WhisperModel::load(model_size, device.clone())
        .await
        .context("Failed to load Whisper model")?;
    let engine = Arc::new(TranscriptionEngine::new(model, config.transcription.clone()));

    let app_state = AppState::new(config.clone(), engine, device);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Transcription service ready, listening on http://{}", bind_addr);

    let server = HttpServer::new(move || {
        // Single local browser client; CORS stays permissive
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::RequestMetrics)
            .route("/health", web::get().to(health::health_check))
            .route("/transcribe", web::post().to(handlers::transcribe))
            .route("/transcribe-udp", web::post().to(handlers::transcribe_raw))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whisper_transcribe_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT and flip the global shutdown flag so in-flight
/// requests finish before the process exits.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
