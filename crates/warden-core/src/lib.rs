/*!
 * Warden Core
 *
 * Tipos, configuração e utilitários compartilhados para a workspace Warden
 */

pub mod config;
pub mod error;
pub mod logging;
pub mod task;
pub mod traits;
pub mod utils;

// Re-exportações públicas
pub use config::{CacheConfig, ResourceLimits, WardenConfig};
pub use error::{Error, Result};
pub use task::PeriodicTask;
pub use traits::{MemoryProbe, Reclaimable};
