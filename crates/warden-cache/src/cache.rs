use crate::entry::CacheEntry;
use crate::size::SizeEstimate;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};
use warden_core::{CacheConfig, PeriodicTask, Reclaimable};

/// Snapshot das métricas do cache
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: usize,
    pub max_size: usize,
    pub max_memory_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
    pub avg_entry_size: f64,
}

/// Estado protegido pelo lock único do cache
struct CacheState<V> {
    entries: LruCache<String, CacheEntry<V>>,
    total_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<V> CacheState<V> {
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.pop(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }
}

/// Cache LRU limitado por número de entradas e memória estimada, com TTL.
///
/// Toda mutação passa por um único lock, que mantém a ordem de recência e os
/// contadores consistentes entre chamadores concorrentes.
pub struct BoundedCache<V> {
    name: String,
    config: CacheConfig,
    max_memory_bytes: usize,
    state: Mutex<CacheState<V>>,
    sweeper: PeriodicTask,
}

impl<V> BoundedCache<V>
where
    V: SizeEstimate + Clone + Send + Sync + 'static,
{
    /// Cria um novo cache com os limites informados.
    ///
    /// Falha com [`warden_core::Error::Config`] se os limites forem inválidos.
    pub fn new(config: CacheConfig) -> warden_core::Result<Self> {
        Self::with_name("cache", config)
    }

    /// Cria um cache com nome próprio, usado nos logs
    pub fn with_name(name: impl Into<String>, config: CacheConfig) -> warden_core::Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            max_memory_bytes: config.max_memory_bytes(),
            config,
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                total_bytes: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
            sweeper: PeriodicTask::new("cache-sweeper"),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Obtém um valor do cache.
    ///
    /// Um acerto move a entrada para a posição mais recente. Entradas expiradas
    /// são removidas e tratadas como ausentes.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let expired = match state.entries.peek(key) {
            Some(entry) => entry.is_expired_at(now),
            None => {
                state.misses += 1;
                return None;
            }
        };

        if expired {
            state.remove(key);
            state.expirations += 1;
            state.misses += 1;
            trace!(cache = %self.name, key, "entrada expirada removida na leitura");
            return None;
        }

        let entry = state.entries.get_mut(key)?;
        entry.touch(now);
        let value = entry.value.clone();
        state.hits += 1;
        Some(value)
    }

    /// Insere ou sobrescreve um valor; `ttl = None` usa o TTL padrão
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        // estimativa fora do lock: serialização pode ser cara
        let size = value.estimated_size();
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let entry = CacheEntry::new(key.clone(), value, ttl, size);

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(previous) = state.entries.put(key, entry) {
            state.total_bytes = state.total_bytes.saturating_sub(previous.size_bytes);
        }
        state.total_bytes += size;

        self.evict_locked(state);
    }

    /// Remove uma chave; retorna `true` se ela existia
    pub fn delete(&self, key: &str) -> bool {
        self.state.lock().remove(key).is_some()
    }

    /// Remove todas as entradas, preservando os contadores
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.total_bytes = 0;
    }

    /// Verifica presença sem afetar a ordem LRU nem os contadores
    pub fn contains(&self, key: &str) -> bool {
        self.state
            .lock()
            .entries
            .peek(key)
            .map(|e| !e.is_expired())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Soma das estimativas de tamanho das entradas presentes
    pub fn total_bytes(&self) -> usize {
        self.state.lock().total_bytes
    }

    /// Retorna o valor em cache ou calcula, armazena e retorna um novo.
    ///
    /// O cálculo roda fora do lock; chamadas concorrentes para a mesma chave
    /// podem calcular mais de uma vez e a última escrita prevalece.
    pub async fn get_or_insert_with<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = compute().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }

    /// Remove todas as entradas com TTL vencido, independente da pressão LRU
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.remove(key);
        }
        state.expirations += expired.len() as u64;

        if !expired.is_empty() {
            debug!(cache = %self.name, removed = expired.len(), "entradas expiradas removidas");
        }
        expired.len()
    }

    /// Obtém estatísticas do cache
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let lookups = state.hits + state.misses;
        let entries = state.entries.len();

        CacheStats {
            entries,
            total_bytes: state.total_bytes,
            max_size: self.config.max_size,
            max_memory_bytes: self.max_memory_bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expirations: state.expirations,
            hit_rate: if lookups > 0 {
                state.hits as f64 / lookups as f64
            } else {
                0.0
            },
            avg_entry_size: if entries > 0 {
                state.total_bytes as f64 / entries as f64
            } else {
                0.0
            },
        }
    }

    /// Inicia a varredura periódica.
    ///
    /// Cada passada remove as entradas expiradas e o excesso que sobrou de uma
    /// remoção limitada por `eviction_batch_size`.
    ///
    /// A task guarda apenas uma referência fraca e termina sozinha quando o
    /// cache é descartado.
    pub fn start_sweeper(self: &Arc<Self>) -> bool {
        let cache = Arc::downgrade(self);
        self.sweeper.start(self.config.cleanup_interval, move || {
            let cache = cache.clone();
            async move {
                match cache.upgrade() {
                    Some(cache) => {
                        cache.reclaim();
                        true
                    }
                    None => false,
                }
            }
        })
    }

    /// Para a varredura e aguarda a task terminar
    pub async fn stop_sweeper(&self) {
        self.sweeper.stop().await;
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper.is_running()
    }

    /// Remove entradas LRU enquanto algum limite estiver excedido.
    ///
    /// Para após `eviction_batch_size` remoções; o excesso restante sai na
    /// próxima inserção ou varredura. A entrada mais recente nunca é removida
    /// por pressão de memória, então o total pode passar do limite por no
    /// máximo uma entrada.
    fn evict_locked(&self, state: &mut CacheState<V>) -> usize {
        let mut evicted = 0;

        while evicted < self.config.eviction_batch_size {
            let over_count = state.entries.len() > self.config.max_size;
            let over_memory = state.total_bytes > self.max_memory_bytes && state.entries.len() > 1;
            if !over_count && !over_memory {
                break;
            }
            match state.entries.pop_lru() {
                Some((key, entry)) => {
                    state.total_bytes = state.total_bytes.saturating_sub(entry.size_bytes);
                    state.evictions += 1;
                    evicted += 1;
                    trace!(cache = %self.name, key = %key, size = entry.size_bytes, "entrada removida por LRU");
                }
                None => break,
            }
        }

        if evicted > 0 {
            debug!(
                cache = %self.name,
                evicted,
                entries = state.entries.len(),
                total_bytes = state.total_bytes,
                "passada de eviction concluída"
            );
        }
        evicted
    }
}

impl<V> Reclaimable for BoundedCache<V>
where
    V: SizeEstimate + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn reclaim(&self) -> usize {
        let expired = self.cleanup_expired();
        let evicted = self.evict_locked(&mut self.state.lock());
        expired + evicted
    }
}
