use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;
use warden_cache::BoundedCache;
use warden_core::logging::init_tracing;
use warden_core::utils::cache_key;
use warden_core::WardenConfig;
use warden_resources::{
    sync_cleanup, ConnectionManager, DatabaseConnection, ResourceManager, ResourceType,
};

#[derive(Debug, thiserror::Error)]
#[error("tabela inexistente: {0}")]
struct MemoryDbError(String);

/// Banco em memória com uma única tabela `documents`
struct MemoryDb {
    documents: Arc<Vec<Value>>,
}

#[async_trait]
impl DatabaseConnection for MemoryDb {
    type Row = Value;
    type Error = MemoryDbError;

    async fn query(&mut self, sql: &str, _params: &[Value]) -> Result<Vec<Value>, MemoryDbError> {
        if !sql.contains("documents") {
            return Err(MemoryDbError(sql.to_string()));
        }
        Ok(self.documents.as_ref().clone())
    }

    async fn execute(&mut self, _sql: &str, _params: &[Value]) -> Result<u64, MemoryDbError> {
        Ok(0)
    }
}

struct MemoryDbManager {
    documents: Arc<Vec<Value>>,
    opened: AtomicUsize,
}

#[async_trait]
impl ConnectionManager for MemoryDbManager {
    type Connection = MemoryDb;

    async fn connect(&self) -> Result<MemoryDb, MemoryDbError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryDb {
            documents: self.documents.clone(),
        })
    }
}

/// "Cálculo caro": resume um documento
async fn summarize(document: &Value) -> anyhow::Result<Value> {
    tokio::time::sleep(Duration::from_millis(50)).await;
    let text = document["text"].as_str().context("documento sem texto")?;
    Ok(json!({
        "id": document["id"],
        "words": text.split_whitespace().count(),
        "preview": text.chars().take(24).collect::<String>(),
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info,warden_resources=debug");

    let config = WardenConfig::from_env().context("configuração inválida")?;

    // Um cache e um gerenciador por processo, repassados explicitamente
    let cache = Arc::new(BoundedCache::<Value>::with_name("summaries", config.cache.clone())?);
    cache.start_sweeper();

    let db = MemoryDbManager {
        documents: Arc::new(vec![
            json!({"id": 1, "text": "limites de memória são suaves e medidos por estimativa"}),
            json!({"id": 2, "text": "conexões voltam ao pool quando o escopo termina"}),
        ]),
        opened: AtomicUsize::new(0),
    };
    let manager = ResourceManager::new(config.resources.clone(), Some(db))?;
    manager.register_reclaimable(cache.clone());
    manager.start().await?;

    let documents = {
        let mut conn = manager.get_database_connection().await?;
        conn.query("SELECT * FROM documents", &[]).await?
    };

    // A segunda rodada sai inteira do cache
    for round in 1..=2 {
        for document in &documents {
            let key = cache_key("summary", &[document.to_string()]);
            let summary = cache
                .get_or_insert_with(&key, None, || summarize(document))
                .await?;
            info!(round, %summary, "resumo pronto");
        }
    }

    let session = manager
        .register(
            "sessao-demo",
            String::from("usuario-42"),
            ResourceType::Session,
            Some(sync_cleanup(|| {
                info!("sessão de demonstração encerrada");
                Ok(())
            })),
        )
        .await?;
    {
        let guard = session.acquire()?;
        info!(user = guard.downcast_ref::<String>().map(String::as_str), "sessão em uso");
    }

    let stats = manager.get_resource_stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!("{}", serde_json::to_string_pretty(&cache.stats())?);

    manager.shutdown().await;
    cache.stop_sweeper().await;
    Ok(())
}
