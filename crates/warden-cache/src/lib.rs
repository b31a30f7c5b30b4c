/*!
 * Warden Cache
 *
 * Cache chave -> valor para resultados caros de calcular, limitado por número
 * de entradas e por memória estimada, com expiração por TTL e eviction LRU.
 */

mod cache;
mod entry;
mod size;

// Re-exportações públicas
pub use cache::{BoundedCache, CacheStats};
pub use entry::CacheEntry;
pub use size::{estimate_serialized, SizeEstimate, DEFAULT_SIZE_ESTIMATE};
