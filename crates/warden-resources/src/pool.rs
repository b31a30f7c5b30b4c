use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use warden_core::{Error, ResourceLimits, Result};

/// Conexão de banco usada pelo pool
#[async_trait]
pub trait DatabaseConnection: Send + 'static {
    type Row: Send;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Executa uma consulta e retorna as linhas
    async fn query(&mut self, sql: &str, params: &[Value]) -> std::result::Result<Vec<Self::Row>, Self::Error>;

    /// Executa um comando e retorna o número de linhas afetadas
    async fn execute(&mut self, sql: &str, params: &[Value]) -> std::result::Result<u64, Self::Error>;

    /// Fecha a conexão
    async fn close(&mut self) {}
}

/// Fábrica de conexões do pool
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    type Connection: DatabaseConnection;

    /// Abre uma nova conexão
    async fn connect(
        &self,
    ) -> std::result::Result<Self::Connection, <Self::Connection as DatabaseConnection>::Error>;

    /// Verifica uma conexão ociosa antes de reutilizá-la
    async fn is_valid(&self, _conn: &mut Self::Connection) -> bool {
        true
    }
}

/// Limites do pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub connection_timeout: Duration,
    pub max_inactive_lifetime: Duration,
}

impl PoolConfig {
    pub fn from_limits(limits: &ResourceLimits) -> Self {
        Self {
            min_size: limits.min_db_connections,
            max_size: limits.max_db_connections,
            connection_timeout: limits.connection_timeout,
            max_inactive_lifetime: limits.max_inactive_connection_lifetime,
        }
    }
}

/// Métricas de uso de uma conexão
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub queries: u64,
    pub errors: u64,
    pub total_query_ms: f64,
}

impl ConnectionStats {
    fn new(id: u64) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            last_used: None,
            queries: 0,
            errors: 0,
            total_query_ms: 0.0,
        }
    }

    fn record(&mut self, elapsed: Duration, ok: bool) {
        self.queries += 1;
        if !ok {
            self.errors += 1;
        }
        self.total_query_ms += elapsed.as_secs_f64() * 1000.0;
        self.last_used = Some(Utc::now());
    }

    pub fn avg_query_ms(&self) -> f64 {
        if self.queries == 0 {
            0.0
        } else {
            self.total_query_ms / self.queries as f64
        }
    }
}

/// Estatísticas do pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub idle: usize,
    pub active: usize,
    pub min_size: usize,
    pub max_size: usize,
    pub acquisitions: u64,
    pub timeouts: u64,
    pub created: u64,
    pub recycled: u64,
    pub closed: bool,
}

struct IdleConnection<C> {
    conn: C,
    stats: ConnectionStats,
    idle_since: Instant,
}

struct PoolShared<M: ConnectionManager> {
    manager: M,
    config: PoolConfig,
    idle: Mutex<VecDeque<IdleConnection<M::Connection>>>,
    slots: Arc<Semaphore>,
    size: AtomicUsize,
    closed: AtomicBool,
    next_id: AtomicU64,
    acquisitions: AtomicU64,
    timeouts: AtomicU64,
    created: AtomicU64,
    recycled: AtomicU64,
}

impl<M: ConnectionManager> PoolShared<M> {
    async fn open(&self) -> Result<(M::Connection, ConnectionStats)> {
        let conn = self
            .manager
            .connect()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.size.fetch_add(1, Ordering::SeqCst);
        self.created.fetch_add(1, Ordering::SeqCst);
        debug!(connection_id = id, "nova conexão aberta");
        Ok((conn, ConnectionStats::new(id)))
    }

    async fn discard(&self, mut conn: M::Connection, stats: &ConnectionStats) {
        conn.close().await;
        self.size.fetch_sub(1, Ordering::SeqCst);
        debug!(connection_id = stats.id, queries = stats.queries, "conexão descartada");
    }
}

/// Pool de conexões de banco com métricas por conexão.
///
/// As conexões são criadas sob demanda até `max_size`. Conexões ociosas além de
/// `max_inactive_lifetime` são recicladas na próxima retirada.
pub struct ConnectionPool<M: ConnectionManager> {
    shared: Arc<PoolShared<M>>,
    initialized: tokio::sync::Mutex<bool>,
}

impl<M: ConnectionManager> ConnectionPool<M> {
    pub fn new(manager: M, config: PoolConfig) -> Self {
        let max_size = config.max_size.max(1);
        Self {
            shared: Arc::new(PoolShared {
                manager,
                slots: Arc::new(Semaphore::new(max_size)),
                config: PoolConfig { max_size, ..config },
                idle: Mutex::new(VecDeque::new()),
                size: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                acquisitions: AtomicU64::new(0),
                timeouts: AtomicU64::new(0),
                created: AtomicU64::new(0),
                recycled: AtomicU64::new(0),
            }),
            initialized: tokio::sync::Mutex::new(false),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Abre as `min_size` conexões iniciais; chamadas seguintes não fazem nada
    pub async fn initialize(&self) -> Result<()> {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return Ok(());
        }
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        // cada conexão entra na fila assim que abre: um timeout no meio não perde nada
        let min_size = self.shared.config.min_size.min(self.shared.config.max_size);
        while self.shared.size.load(Ordering::SeqCst) < min_size {
            let (conn, stats) = self.shared.open().await?;
            self.shared.idle.lock().push_back(IdleConnection {
                conn,
                stats,
                idle_since: Instant::now(),
            });
        }
        *initialized = true;

        info!(
            min_size,
            max_size = self.shared.config.max_size,
            "pool de conexões inicializado"
        );
        Ok(())
    }

    /// Retira uma conexão do pool.
    ///
    /// A conexão volta ao pool quando o guard sai de escopo, inclusive em caso
    /// de erro do chamador. Falha com [`Error::PoolTimeout`] se a retirada
    /// inteira (inicialização, espera por vaga e abertura da conexão) passar
    /// do timeout e com [`Error::PoolClosed`] após `close()`.
    pub async fn get_connection(&self) -> Result<PooledConnection<M>> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        let timeout = self.shared.config.connection_timeout;
        match tokio::time::timeout(timeout, self.acquire()).await {
            Ok(result) => result,
            Err(_) => {
                self.shared.timeouts.fetch_add(1, Ordering::SeqCst);
                warn!(timeout_ms = timeout.as_millis() as u64, "timeout ao obter conexão do pool");
                Err(Error::PoolTimeout(timeout))
            }
        }
    }

    async fn acquire(&self) -> Result<PooledConnection<M>> {
        self.initialize().await?;

        let permit = self
            .shared
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed)?;

        let (conn, stats) = loop {
            let candidate = self.shared.idle.lock().pop_front();
            match candidate {
                Some(idle) if idle.idle_since.elapsed() > self.shared.config.max_inactive_lifetime => {
                    self.shared.recycled.fetch_add(1, Ordering::SeqCst);
                    self.shared.discard(idle.conn, &idle.stats).await;
                }
                Some(mut idle) => {
                    if self.shared.manager.is_valid(&mut idle.conn).await {
                        break (idle.conn, idle.stats);
                    }
                    self.shared.recycled.fetch_add(1, Ordering::SeqCst);
                    self.shared.discard(idle.conn, &idle.stats).await;
                }
                None => break self.shared.open().await?,
            }
        };

        self.shared.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(PooledConnection {
            conn: Some(conn),
            stats,
            shared: self.shared.clone(),
            _permit: permit,
        })
    }

    /// Fecha todas as conexões ociosas e rejeita novas retiradas.
    ///
    /// Conexões em uso são fechadas quando devolvidas.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.slots.close();

        let drained: Vec<_> = self.shared.idle.lock().drain(..).collect();
        let count = drained.len();
        for idle in drained {
            self.shared.discard(idle.conn, &idle.stats).await;
        }
        info!(closed = count, "pool de conexões encerrado");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn get_stats(&self) -> PoolStats {
        let size = self.shared.size.load(Ordering::SeqCst);
        let idle = self.shared.idle.lock().len();
        PoolStats {
            size,
            idle,
            active: size.saturating_sub(idle),
            min_size: self.shared.config.min_size,
            max_size: self.shared.config.max_size,
            acquisitions: self.shared.acquisitions.load(Ordering::SeqCst),
            timeouts: self.shared.timeouts.load(Ordering::SeqCst),
            created: self.shared.created.load(Ordering::SeqCst),
            recycled: self.shared.recycled.load(Ordering::SeqCst),
            closed: self.is_closed(),
        }
    }
}

/// Conexão retirada do pool, com consultas cronometradas e contadas
pub struct PooledConnection<M: ConnectionManager> {
    conn: Option<M::Connection>,
    stats: ConnectionStats,
    shared: Arc<PoolShared<M>>,
    _permit: OwnedSemaphorePermit,
}

impl<M: ConnectionManager> PooledConnection<M> {
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Executa uma consulta; erros da conexão voltam sem alteração
    pub async fn query(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> std::result::Result<Vec<<M::Connection as DatabaseConnection>::Row>, <M::Connection as DatabaseConnection>::Error>
    {
        let started = Instant::now();
        let result = self.connection().query(sql, params).await;
        self.track("query", sql, started.elapsed(), result.as_ref().err());
        result
    }

    /// Primeira linha da consulta, se houver
    pub async fn query_one(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> std::result::Result<Option<<M::Connection as DatabaseConnection>::Row>, <M::Connection as DatabaseConnection>::Error>
    {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    /// Executa um comando; erros da conexão voltam sem alteração
    pub async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> std::result::Result<u64, <M::Connection as DatabaseConnection>::Error> {
        let started = Instant::now();
        let result = self.connection().execute(sql, params).await;
        self.track("execute", sql, started.elapsed(), result.as_ref().err());
        result
    }

    fn connection(&mut self) -> &mut M::Connection {
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("conexão já devolvida ao pool"),
        }
    }

    fn track<E: std::fmt::Display>(&mut self, op: &str, sql: &str, elapsed: Duration, error: Option<&E>) {
        self.stats.record(elapsed, error.is_none());
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        match error {
            Some(e) => warn!(
                connection_id = self.stats.id,
                op,
                sql,
                elapsed_ms,
                error = %e,
                "operação no banco falhou"
            ),
            None => debug!(connection_id = self.stats.id, op, elapsed_ms, "operação no banco concluída"),
        }
    }
}

impl<M: ConnectionManager> std::fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").field("stats", &self.stats).finish()
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("conexão já devolvida ao pool"),
        }
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection()
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let stats = self.stats.clone();

        {
            // close() marca o pool antes de drenar sob este mesmo lock
            let mut idle = self.shared.idle.lock();
            if !self.shared.closed.load(Ordering::SeqCst) {
                idle.push_back(IdleConnection {
                    conn,
                    stats,
                    idle_since: Instant::now(),
                });
                return;
            }
        }

        let shared = self.shared.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { shared.discard(conn, &stats).await });
            }
            Err(_) => {
                drop(conn);
                shared.size.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}
