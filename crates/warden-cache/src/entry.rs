use std::time::Duration;
use tokio::time::Instant;

/// Entrada de cache com metadados de acesso
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub access_count: u64,
    pub ttl: Duration,
    /// Tamanho estimado do valor em bytes
    pub size_bytes: usize,
}

impl<V> CacheEntry<V> {
    pub fn new(key: String, value: V, ttl: Duration, size_bytes: usize) -> Self {
        let now = Instant::now();
        Self {
            key,
            value,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            ttl,
            size_bytes,
        }
    }

    /// Expirada quando `now - created_at > ttl`
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Registra um acesso bem-sucedido
    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_accessed = now;
        self.access_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expiry_is_strictly_after_ttl() {
        let entry = CacheEntry::new("k".into(), 1u32, Duration::from_secs(1), 8);
        assert!(!entry.is_expired());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!entry.is_expired());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(entry.is_expired());
        assert!(entry.age() > Duration::from_secs(1));
    }
}
