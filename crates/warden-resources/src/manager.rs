use crate::metrics::{ResourceMetrics, ResourceStats};
use crate::monitor::{MemoryMonitor, SysinfoProbe};
use crate::pool::{ConnectionManager, ConnectionPool, PoolConfig, PooledConnection};
use crate::resource::{CleanupFn, ManagedResource, ResourceGuard, ResourceType};
use chrono::Utc;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn};
use warden_core::{Error, MemoryProbe, PeriodicTask, Reclaimable, ResourceLimits, Result};

/// Estado protegido pelo lock do registro
struct Registry {
    resources: HashMap<String, Arc<ManagedResource>>,
    metrics: ResourceMetrics,
    shutting_down: bool,
}

impl Registry {
    /// Encerra um recurso já removido do mapa.
    ///
    /// Erros da limpeza são registrados e contados, nunca propagados.
    async fn close(&mut self, resource: &ManagedResource, reason: &str) -> bool {
        match resource.close().await {
            Ok(true) => {
                self.metrics.resources_cleaned += 1;
                debug!(resource_id = resource.id(), reason, "recurso encerrado");
                true
            }
            Ok(false) => false,
            Err(e) => {
                self.metrics.resources_cleaned += 1;
                self.metrics.cleanup_errors += 1;
                error!(resource_id = resource.id(), reason, "falha na limpeza do recurso: {:#}", e);
                true
            }
        }
    }
}

/// Coordenador dos recursos do processo.
///
/// Mantém o registro de [`ManagedResource`], o pool de conexões e o monitor de
/// memória. Uma limpeza periódica remove recursos velhos ou ociosos; o alerta
/// de memória dispara uma limpeza emergencial fora do intervalo.
pub struct ResourceManager<M: ConnectionManager> {
    limits: ResourceLimits,
    registry: Mutex<Registry>,
    pool: Option<ConnectionPool<M>>,
    monitor: Arc<MemoryMonitor>,
    operations: Arc<Semaphore>,
    cleanup_task: PeriodicTask,
    memory_callback: parking_lot::Mutex<Option<u64>>,
}

impl<M: ConnectionManager> ResourceManager<M> {
    /// Cria o gerenciador lendo a memória do processo via sysinfo
    pub fn new(limits: ResourceLimits, connections: Option<M>) -> Result<Arc<Self>> {
        Self::with_probe(limits, connections, Arc::new(SysinfoProbe::new()))
    }

    /// Cria o gerenciador com uma fonte de memória própria
    pub fn with_probe(
        limits: ResourceLimits,
        connections: Option<M>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Result<Arc<Self>> {
        limits.validate()?;

        let pool = connections.map(|manager| ConnectionPool::new(manager, PoolConfig::from_limits(&limits)));
        let monitor = Arc::new(MemoryMonitor::new(&limits, probe));

        Ok(Arc::new(Self {
            operations: Arc::new(Semaphore::new(limits.max_concurrent_operations)),
            registry: Mutex::new(Registry {
                resources: HashMap::new(),
                metrics: ResourceMetrics::default(),
                shutting_down: false,
            }),
            pool,
            monitor,
            cleanup_task: PeriodicTask::new("resource-cleanup"),
            memory_callback: parking_lot::Mutex::new(None),
            limits,
        }))
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn memory_monitor(&self) -> &Arc<MemoryMonitor> {
        &self.monitor
    }

    pub fn connection_pool(&self) -> Option<&ConnectionPool<M>> {
        self.pool.as_ref()
    }

    /// Inicializa o pool e inicia o monitor de memória e a limpeza periódica.
    ///
    /// Chamadas repetidas não duplicam tarefas nem callbacks.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.registry.lock().await.shutting_down {
            return Err(Error::ManagerStopped);
        }

        if let Some(pool) = &self.pool {
            pool.initialize().await?;
        }

        {
            let mut callback = self.memory_callback.lock();
            if callback.is_none() {
                let manager = Arc::downgrade(self);
                *callback = Some(self.monitor.add_callback(move |usage_mb| {
                    let manager = manager.clone();
                    async move {
                        let Some(manager) = manager.upgrade() else {
                            return;
                        };
                        // task própria: o timeout do callback não interrompe a limpeza
                        let cleanup = tokio::spawn(async move {
                            manager.record_memory_warning(usage_mb).await;
                            // o monitor pede a recuperação de memória depois dos callbacks
                            manager.emergency_pass().await
                        });
                        if let Err(e) = cleanup.await {
                            error!("limpeza emergencial terminou com erro: {}", e);
                        }
                    }
                }));
            }
        }

        self.monitor.start();

        let manager = Arc::downgrade(self);
        if self.cleanup_task.start(self.limits.cleanup_interval, move || {
            let manager = manager.clone();
            async move {
                match manager.upgrade() {
                    Some(manager) => {
                        manager.cleanup_resources().await;
                        true
                    }
                    None => false,
                }
            }
        }) {
            info!(
                cleanup_interval_secs = self.limits.cleanup_interval.as_secs_f64(),
                max_resource_age_secs = self.limits.max_resource_age.as_secs_f64(),
                "gerenciador de recursos iniciado"
            );
        }
        Ok(())
    }

    /// Registra um recurso externo.
    ///
    /// `cleanup` roda exatamente uma vez, quando o recurso for encerrado por
    /// qualquer caminho. Falha com [`Error::DuplicateResource`] se o id já
    /// estiver registrado.
    pub async fn register<T>(
        &self,
        resource_id: impl Into<String>,
        resource: T,
        resource_type: ResourceType,
        cleanup: Option<CleanupFn>,
    ) -> Result<Arc<ManagedResource>>
    where
        T: Any + Send + Sync,
    {
        let resource_id = resource_id.into();
        let mut registry = self.registry.lock().await;
        if registry.shutting_down {
            return Err(Error::ManagerStopped);
        }
        if registry.resources.contains_key(&resource_id) {
            return Err(Error::DuplicateResource(resource_id));
        }

        let managed = Arc::new(ManagedResource::new(
            resource_id.clone(),
            Arc::new(resource),
            resource_type,
            cleanup,
        ));
        registry.resources.insert(resource_id.clone(), managed.clone());
        registry.metrics.resources_registered += 1;

        debug!(
            resource_id = %resource_id,
            resource_type = resource_type.as_str(),
            total = registry.resources.len(),
            "recurso registrado"
        );
        Ok(managed)
    }

    /// Remove e encerra um recurso; retorna `false` se ele não estava registrado
    pub async fn unregister(&self, resource_id: &str) -> bool {
        let mut registry = self.registry.lock().await;
        match registry.resources.remove(resource_id) {
            Some(resource) => {
                registry.close(&resource, "unregister").await;
                true
            }
            None => false,
        }
    }

    pub async fn get_resource(&self, resource_id: &str) -> Option<Arc<ManagedResource>> {
        self.registry.lock().await.resources.get(resource_id).cloned()
    }

    /// Marca um recurso registrado como em uso
    pub async fn use_resource(&self, resource_id: &str) -> Result<ResourceGuard> {
        let registry = self.registry.lock().await;
        match registry.resources.get(resource_id) {
            Some(resource) => resource.acquire(),
            None => Err(Error::NotFound(resource_id.to_string())),
        }
    }

    /// Retira uma conexão do pool de banco
    pub async fn get_database_connection(&self) -> Result<PooledConnection<M>> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| Error::Config("nenhum gerenciador de conexões configurado".into()))?;

        let conn = pool.get_connection().await?;
        let active = pool.get_stats().active;
        self.registry.lock().await.metrics.record_connections(active);
        Ok(conn)
    }

    /// Executa `operation` respeitando `max_concurrent_operations`
    pub async fn run_limited<F, T>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let _permit = self
            .operations
            .acquire()
            .await
            .map_err(|_| Error::ManagerStopped)?;
        Ok(operation.await)
    }

    /// Registra um componente que deve liberar memória após a limpeza emergencial
    pub fn register_reclaimable(&self, reclaimable: Arc<dyn Reclaimable>) {
        self.monitor.add_reclaimable(reclaimable);
    }

    /// Limpeza de rotina: encerra recursos acima da idade máxima ou ociosos
    /// além de `idle_timeout`. Recursos em uso ficam para a próxima passada.
    pub async fn cleanup_resources(&self) -> usize {
        let mut registry = self.registry.lock().await;
        registry.metrics.cleanup_runs += 1;

        let mut by_age = Vec::new();
        let mut by_idle = Vec::new();
        for (id, resource) in &registry.resources {
            if resource.is_in_use() {
                continue;
            }
            if resource.age() > self.limits.max_resource_age {
                by_age.push(id.clone());
            } else if resource.idle_time() > self.limits.idle_timeout {
                by_idle.push(id.clone());
            }
        }

        let mut cleaned = 0;
        for (ids, reason) in [(by_age, "age"), (by_idle, "idle")] {
            for id in ids {
                if let Some(resource) = registry.resources.remove(&id) {
                    if registry.close(&resource, reason).await {
                        cleaned += 1;
                        match reason {
                            "age" => registry.metrics.expired_by_age += 1,
                            _ => registry.metrics.expired_by_idle += 1,
                        }
                    }
                }
            }
        }

        if cleaned > 0 {
            info!(cleaned, remaining = registry.resources.len(), "limpeza de recursos concluída");
        }
        cleaned
    }

    /// Limpeza emergencial: encerra recursos livres ociosos além de
    /// `emergency_idle_timeout` ou acima de `max_resource_age`, os mais ociosos
    /// primeiro e até `emergency_cleanup_limit` por passada, e depois pede aos
    /// componentes registrados que liberem memória.
    pub async fn emergency_cleanup(&self) -> usize {
        let cleaned = self.emergency_pass().await;
        let reclaimed = self.monitor.request_reclaim();
        debug!(cleaned, reclaimed, "recuperação após limpeza emergencial");
        cleaned
    }

    async fn emergency_pass(&self) -> usize {
        let usage_mb = self.monitor.get_usage_mb();
        let mut registry = self.registry.lock().await;
        registry.metrics.emergency_cleanups += 1;
        registry.metrics.record_memory(usage_mb);

        let max_age = self.limits.max_resource_age;
        let mut candidates: Vec<_> = registry
            .resources
            .values()
            .filter(|r| !r.is_in_use())
            .map(|r| (r.idle_time(), r.age() > max_age, r.id().to_string()))
            .filter(|(idle, too_old, _)| *too_old || *idle > self.limits.emergency_idle_timeout)
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        if candidates.len() > self.limits.emergency_cleanup_limit {
            warn!(
                candidates = candidates.len(),
                limit = self.limits.emergency_cleanup_limit,
                "limpeza emergencial limitada"
            );
            candidates.truncate(self.limits.emergency_cleanup_limit);
        }

        let mut cleaned = 0;
        for (_, too_old, id) in candidates {
            if let Some(resource) = registry.resources.remove(&id) {
                if registry.close(&resource, "emergency").await {
                    if too_old {
                        registry.metrics.expired_by_age += 1;
                    } else {
                        registry.metrics.expired_by_idle += 1;
                    }
                    cleaned += 1;
                }
            }
        }

        warn!(
            cleaned,
            remaining = registry.resources.len(),
            usage_mb,
            "limpeza emergencial concluída"
        );
        cleaned
    }

    /// Snapshot das métricas com leituras atuais de memória e conexões
    pub async fn get_resource_stats(&self) -> ResourceStats {
        let usage_mb = self.monitor.get_usage_mb();
        let pool_stats = self.pool.as_ref().map(|pool| pool.get_stats());

        let mut registry = self.registry.lock().await;
        registry.metrics.record_memory(usage_mb);
        if let Some(stats) = &pool_stats {
            registry.metrics.record_connections(stats.active);
        }

        let mut by_type = BTreeMap::new();
        let mut in_use = 0;
        for resource in registry.resources.values() {
            *by_type.entry(resource.resource_type().as_str().to_string()).or_insert(0) += 1;
            if resource.is_in_use() {
                in_use += 1;
            }
        }

        ResourceStats {
            metrics: registry.metrics.clone(),
            memory_usage_mb: usage_mb,
            memory_usage_fraction: usage_mb / self.limits.max_memory_mb,
            registered_resources: registry.resources.len(),
            in_use_resources: in_use,
            resources_by_type: by_type,
            connection_pool: pool_stats,
            monitor_running: self.monitor.is_running(),
            cleanup_running: self.cleanup_task.is_running(),
            sampled_at: Utc::now(),
        }
    }

    /// Para as tarefas em background, encerra todos os recursos e fecha o pool.
    ///
    /// Chamadas seguintes não fazem nada.
    pub async fn shutdown(&self) {
        {
            let mut registry = self.registry.lock().await;
            if registry.shutting_down {
                return;
            }
            registry.shutting_down = true;
        }
        info!("encerrando gerenciador de recursos");

        self.cleanup_task.stop().await;
        self.monitor.stop().await;
        if let Some(id) = self.memory_callback.lock().take() {
            self.monitor.remove_callback(id);
        }
        self.operations.close();

        let closed = {
            let mut registry = self.registry.lock().await;
            let resources: Vec<_> = registry.resources.drain().map(|(_, r)| r).collect();
            let mut closed = 0;
            for resource in resources {
                if registry.close(&resource, "shutdown").await {
                    closed += 1;
                }
            }
            closed
        };

        if let Some(pool) = &self.pool {
            pool.close().await;
        }
        info!(closed, "gerenciador de recursos encerrado");
    }

    async fn record_memory_warning(&self, usage_mb: f64) {
        let mut registry = self.registry.lock().await;
        registry.metrics.memory_warnings += 1;
        registry.metrics.record_memory(usage_mb);
    }
}
