/*!
 * Warden Resources
 *
 * Registro e ciclo de vida de recursos externos (conexões, sessões, handles),
 * pool de conexões de banco e monitoramento da memória do processo.
 */

mod manager;
mod metrics;
mod monitor;
mod pool;
mod resource;

// Re-exportações públicas
pub use manager::ResourceManager;
pub use metrics::{ResourceMetrics, ResourceStats};
pub use monitor::{MemoryCallback, MemoryMonitor, MemorySample, SysinfoProbe};
pub use pool::{
    ConnectionManager, ConnectionPool, ConnectionStats, DatabaseConnection, PoolConfig,
    PoolStats, PooledConnection,
};
pub use resource::{
    cleanup_fn, sync_cleanup, CleanupFn, ManagedResource, ResourceGuard, ResourceInfo,
    ResourceState, ResourceType,
};
