use crate::device::DeviceManager;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    // Recomputed on every call; GPU numbers are queried live, never cached
    let gpu_info = match DeviceManager::gpu_telemetry(&state.device) {
        Some(telemetry) => serde_json::to_value(telemetry).unwrap_or_else(|_| json!({})),
        None => json!({}),
    };

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms()
        }));
    }

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "whisper-transcription",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "model": format!("candle-whisper/{}", config.model.whisper_model),
        "device": DeviceManager::device_kind(&state.device),
        "gpu_info": gpu_info,
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "corrupted_chunks": metrics.corrupted_chunks,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "endpoints": endpoint_stats
        }
    }))
}
