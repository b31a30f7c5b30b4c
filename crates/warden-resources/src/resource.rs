use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use warden_core::{Error, Result};

/// Tipo de recurso gerenciado
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    DbConnection,
    Session,
    FileHandle,
    Buffer,
    ThreadPool,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::DbConnection => "db_connection",
            ResourceType::Session => "session",
            ResourceType::FileHandle => "file_handle",
            ResourceType::Buffer => "buffer",
            ResourceType::ThreadPool => "thread_pool",
        }
    }
}

/// Estado do ciclo de vida: `Registered -> InUse -> Registered -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Registered,
    InUse,
    Closed,
}

/// Função de limpeza executada uma única vez quando o recurso é encerrado
pub type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Empacota uma limpeza assíncrona
pub fn cleanup_fn<F, Fut>(cleanup: F) -> CleanupFn
where
    F: FnOnce() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(move || Box::pin(cleanup()) as BoxFuture<'static, anyhow::Result<()>>)
}

/// Empacota uma limpeza síncrona
pub fn sync_cleanup<F>(cleanup: F) -> CleanupFn
where
    F: FnOnce() -> anyhow::Result<()> + Send + Sync + 'static,
{
    Box::new(move || Box::pin(async move { cleanup() }) as BoxFuture<'static, anyhow::Result<()>>)
}

struct Lifecycle {
    state: ResourceState,
    last_used: Instant,
    use_count: u64,
    active_uses: usize,
}

/// Recurso externo rastreado com metadados de idade e uso
pub struct ManagedResource {
    id: String,
    resource_type: ResourceType,
    handle: Arc<dyn Any + Send + Sync>,
    cleanup: Mutex<Option<CleanupFn>>,
    created_at: Instant,
    registered_at: DateTime<Utc>,
    lifecycle: Mutex<Lifecycle>,
}

/// Visão serializável de um recurso
#[derive(Debug, Clone, Serialize)]
pub struct ResourceInfo {
    pub id: String,
    pub resource_type: ResourceType,
    pub state: ResourceState,
    pub registered_at: DateTime<Utc>,
    pub age_secs: f64,
    pub idle_secs: f64,
    pub use_count: u64,
}

impl ManagedResource {
    pub(crate) fn new(
        id: String,
        handle: Arc<dyn Any + Send + Sync>,
        resource_type: ResourceType,
        cleanup: Option<CleanupFn>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            resource_type,
            handle,
            cleanup: Mutex::new(cleanup),
            created_at: now,
            registered_at: Utc::now(),
            lifecycle: Mutex::new(Lifecycle {
                state: ResourceState::Registered,
                last_used: now,
                use_count: 0,
                active_uses: 0,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn state(&self) -> ResourceState {
        self.lifecycle.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ResourceState::Closed
    }

    pub fn is_in_use(&self) -> bool {
        self.lifecycle.lock().active_uses > 0
    }

    pub fn use_count(&self) -> u64 {
        self.lifecycle.lock().use_count
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Tempo desde o último uso; zero enquanto estiver em uso
    pub fn idle_time(&self) -> Duration {
        let lifecycle = self.lifecycle.lock();
        if lifecycle.active_uses > 0 {
            Duration::ZERO
        } else {
            lifecycle.last_used.elapsed()
        }
    }

    /// Marca o recurso como em uso e devolve um guard com acesso ao handle.
    ///
    /// Falha com [`Error::ResourceClosed`] depois do encerramento.
    pub fn acquire(self: &Arc<Self>) -> Result<ResourceGuard> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == ResourceState::Closed {
            return Err(Error::ResourceClosed(self.id.clone()));
        }
        lifecycle.state = ResourceState::InUse;
        lifecycle.active_uses += 1;
        lifecycle.use_count += 1;
        lifecycle.last_used = Instant::now();

        Ok(ResourceGuard {
            resource: Arc::clone(self),
        })
    }

    pub fn info(&self) -> ResourceInfo {
        let lifecycle = self.lifecycle.lock();
        ResourceInfo {
            id: self.id.clone(),
            resource_type: self.resource_type,
            state: lifecycle.state,
            registered_at: self.registered_at,
            age_secs: self.created_at.elapsed().as_secs_f64(),
            idle_secs: if lifecycle.active_uses > 0 {
                0.0
            } else {
                lifecycle.last_used.elapsed().as_secs_f64()
            },
            use_count: lifecycle.use_count,
        }
    }

    /// Encerra o recurso e executa a limpeza no máximo uma vez.
    ///
    /// Retorna `Ok(false)` se já estava encerrado. Erros e panics da função de
    /// limpeza viram `Err`; o recurso fica encerrado de qualquer forma.
    pub(crate) async fn close(&self) -> anyhow::Result<bool> {
        let cleanup = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state == ResourceState::Closed {
                return Ok(false);
            }
            lifecycle.state = ResourceState::Closed;
            self.cleanup.lock().take()
        };

        if let Some(cleanup) = cleanup {
            match AssertUnwindSafe(async move { cleanup().await }).catch_unwind().await {
                Ok(result) => result?,
                Err(_) => anyhow::bail!("limpeza do recurso {} entrou em panic", self.id),
            }
        }
        Ok(true)
    }

    fn release(&self) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.active_uses = lifecycle.active_uses.saturating_sub(1);
        lifecycle.last_used = Instant::now();
        if lifecycle.active_uses == 0 && lifecycle.state == ResourceState::InUse {
            lifecycle.state = ResourceState::Registered;
        }
    }
}

impl std::fmt::Debug for ManagedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedResource")
            .field("id", &self.id)
            .field("resource_type", &self.resource_type)
            .field("state", &self.state())
            .finish()
    }
}

/// Uso ativo de um recurso; devolve o recurso a `Registered` no drop
pub struct ResourceGuard {
    resource: Arc<ManagedResource>,
}

impl ResourceGuard {
    pub fn id(&self) -> &str {
        self.resource.id()
    }

    /// Acesso tipado ao handle registrado
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.resource.handle.downcast_ref::<T>()
    }

    pub fn resource(&self) -> &Arc<ManagedResource> {
        &self.resource
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.resource.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn resource(cleanup: Option<CleanupFn>) -> Arc<ManagedResource> {
        Arc::new(ManagedResource::new(
            "r1".into(),
            Arc::new(String::from("handle")),
            ResourceType::Session,
            cleanup,
        ))
    }

    #[tokio::test]
    async fn state_machine_follows_guard_lifetime() {
        let res = resource(None);
        assert_eq!(res.state(), ResourceState::Registered);

        {
            let guard = res.acquire().unwrap();
            assert_eq!(res.state(), ResourceState::InUse);
            assert_eq!(guard.downcast_ref::<String>().map(String::as_str), Some("handle"));
            assert!(guard.downcast_ref::<u32>().is_none());
        }
        assert_eq!(res.state(), ResourceState::Registered);
        assert_eq!(res.use_count(), 1);

        assert!(res.close().await.unwrap());
        assert_eq!(res.state(), ResourceState::Closed);
        assert!(matches!(res.acquire(), Err(Error::ResourceClosed(id)) if id == "r1"));
    }

    #[tokio::test]
    async fn close_runs_cleanup_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let res = resource(Some(sync_cleanup(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })));

        assert!(res.close().await.unwrap());
        assert!(!res.close().await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_cleanup_becomes_error() {
        let res = resource(Some(cleanup_fn(|| async {
            if true {
                panic!("boom");
            }
            Ok(())
        })));
        assert!(res.close().await.is_err());
        assert!(res.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_is_zero_while_in_use() {
        let res = resource(None);
        let guard = res.acquire().unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(res.idle_time(), Duration::ZERO);
        drop(guard);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(res.idle_time(), Duration::from_secs(5));
        assert_eq!(res.age(), Duration::from_secs(15));
    }
}
