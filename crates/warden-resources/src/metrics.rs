use crate::pool::PoolStats;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Contadores do gerenciador de recursos.
///
/// Só são alterados sob o lock do registro, junto com os dados que descrevem.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceMetrics {
    pub memory_usage_mb: f64,
    pub peak_memory_mb: f64,
    pub active_connections: usize,
    pub peak_connections: usize,
    pub resources_registered: u64,
    pub resources_cleaned: u64,
    pub expired_by_age: u64,
    pub expired_by_idle: u64,
    pub cleanup_errors: u64,
    pub cleanup_runs: u64,
    pub emergency_cleanups: u64,
    pub memory_warnings: u64,
}

impl ResourceMetrics {
    pub(crate) fn record_memory(&mut self, usage_mb: f64) {
        self.memory_usage_mb = usage_mb;
        if usage_mb > self.peak_memory_mb {
            self.peak_memory_mb = usage_mb;
        }
    }

    pub(crate) fn record_connections(&mut self, active: usize) {
        self.active_connections = active;
        if active > self.peak_connections {
            self.peak_connections = active;
        }
    }
}

/// Snapshot consumido pela camada de health/observabilidade
#[derive(Debug, Clone, Serialize)]
pub struct ResourceStats {
    pub metrics: ResourceMetrics,
    pub memory_usage_mb: f64,
    pub memory_usage_fraction: f64,
    pub registered_resources: usize,
    pub in_use_resources: usize,
    pub resources_by_type: BTreeMap<String, usize>,
    pub connection_pool: Option<PoolStats>,
    pub monitor_running: bool,
    pub cleanup_running: bool,
    pub sampled_at: DateTime<Utc>,
}
