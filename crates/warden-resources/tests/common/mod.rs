#![allow(dead_code)]

use async_trait::async_trait;
use mockall::mock;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use warden_core::{MemoryProbe, ResourceLimits};
use warden_resources::{ConnectionManager, DatabaseConnection};

mock! {
    pub Probe {}

    impl MemoryProbe for Probe {
        fn resident_mb(&self) -> f64;
    }
}

/// Probe que sempre reporta o mesmo uso
pub fn fixed_probe(usage_mb: f64) -> Arc<MockProbe> {
    let mut probe = MockProbe::new();
    probe.expect_resident_mb().return_const(usage_mb);
    Arc::new(probe)
}

#[derive(Debug, thiserror::Error)]
pub enum FakeDbError {
    #[error("consulta inválida: {0}")]
    BadQuery(String),
    #[error("banco indisponível")]
    Unavailable,
}

/// Conexão em memória; consultas que começam com `FAIL` falham
pub struct FakeConnection {
    pub id: usize,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl DatabaseConnection for FakeConnection {
    type Row = Value;
    type Error = FakeDbError;

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Value>, FakeDbError> {
        if sql.starts_with("FAIL") {
            return Err(FakeDbError::BadQuery(sql.to_string()));
        }
        Ok(vec![json!({"connection": self.id, "sql": sql, "params": params})])
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, FakeDbError> {
        if sql.starts_with("FAIL") {
            return Err(FakeDbError::BadQuery(sql.to_string()));
        }
        Ok(params.len() as u64)
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct FakeManager {
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    pub fail_connect: Arc<AtomicBool>,
    /// `connect` nunca termina enquanto ligado
    pub hang_connect: Arc<AtomicBool>,
}

impl FakeManager {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionManager for FakeManager {
    type Connection = FakeConnection;

    async fn connect(&self) -> Result<FakeConnection, FakeDbError> {
        if self.hang_connect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(FakeDbError::Unavailable);
        }
        let id = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FakeConnection {
            id,
            closed: self.closed.clone(),
        })
    }
}

pub fn test_limits() -> ResourceLimits {
    ResourceLimits {
        max_memory_mb: 1000.0,
        memory_warning_threshold: 0.8,
        min_db_connections: 1,
        max_db_connections: 2,
        connection_timeout: Duration::from_millis(200),
        callback_timeout: Duration::from_secs(1),
        memory_check_interval: Duration::from_secs(1),
        ..Default::default()
    }
}
