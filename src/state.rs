//! # Application State Management
//!
//! Shared state accessed by all HTTP request handlers: configuration, the
//! transcription engine, and request metrics.
//!
//! ## Arc<RwLock<T>> Pattern
//! Handlers run concurrently on the server's worker threads, so mutable
//! state lives behind `Arc<RwLock<_>>`: many readers, one writer at a time.
//! The engine itself is immutable shared state (`Arc`) — its internal
//! inference lock is its own concern.

use crate::config::AppConfig;
use crate::transcription::TranscriptionEngine;
use candle_core::Device;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// State shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,

    /// One loaded model, many concurrent callers
    pub engine: Arc<TranscriptionEngine>,

    /// Device the model was loaded on. Kept here so the health endpoint can
    /// report it without queueing behind the inference lock.
    pub device: Device,

    pub metrics: Arc<RwLock<ServiceMetrics>>,

    pub start_time: Instant,
}

/// Counters collected across all requests since startup.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    /// Total HTTP requests processed
    pub request_count: u64,

    /// Requests that ended in a 4xx/5xx
    pub error_count: u64,

    /// Clips tolerated as corrupted chunks (returned as empty-text success)
    pub corrupted_chunks: u64,

    /// Per-endpoint request statistics, keyed "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, engine: Arc<TranscriptionEngine>, device: Device) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            engine,
            device,
            metrics: Arc::new(RwLock::new(ServiceMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration; cloning releases the lock
    /// immediately so readers never block each other long.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    pub fn record_corrupted_chunk(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.corrupted_chunks += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Consistent copy of the metrics for serialization, so locks are not
    /// held while the HTTP response is built.
    pub fn get_metrics_snapshot(&self) -> ServiceMetrics {
        let metrics = self.metrics.read().unwrap();
        ServiceMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            corrupted_chunks: metrics.corrupted_chunks,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_metric_rates() {
        let metric = EndpointMetric {
            request_count: 4,
            total_duration_ms: 200,
            error_count: 1,
        };
        assert_eq!(metric.average_duration_ms(), 50.0);
        assert_eq!(metric.error_rate(), 0.25);

        let empty = EndpointMetric::default();
        assert_eq!(empty.average_duration_ms(), 0.0);
        assert_eq!(empty.error_rate(), 0.0);
    }
}
