use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Configuração do cache limitado
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Número máximo de entradas
    pub max_size: usize,
    /// Memória estimada máxima em MB (limite suave)
    pub max_memory_mb: f64,
    /// TTL aplicado quando o chamador não informa um
    #[serde(with = "duration_secs")]
    pub default_ttl: Duration,
    /// Máximo de entradas removidas por passada de eviction
    pub eviction_batch_size: usize,
    /// Intervalo da varredura de entradas expiradas
    #[serde(with = "duration_secs")]
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            max_memory_mb: 100.0,
            default_ttl: Duration::from_secs(3600), // 1 hora
            eviction_batch_size: 100,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Limite de memória convertido para bytes
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb * 1024.0 * 1024.0) as usize
    }

    /// Valida os limites configurados
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::Config("cache.max_size deve ser maior que zero".into()));
        }
        if self.max_memory_mb <= 0.0 {
            return Err(Error::Config("cache.max_memory_mb deve ser positivo".into()));
        }
        if self.eviction_batch_size == 0 {
            return Err(Error::Config("cache.eviction_batch_size deve ser maior que zero".into()));
        }
        if self.cleanup_interval.is_zero() {
            return Err(Error::Config("cache.cleanup_interval não pode ser zero".into()));
        }
        Ok(())
    }
}

/// Limites estáticos do gerenciador de recursos
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Memória máxima do processo em MB
    pub max_memory_mb: f64,
    /// Fração de `max_memory_mb` que dispara o alerta de memória
    pub memory_warning_threshold: f64,
    /// Conexões mantidas abertas desde a inicialização do pool
    pub min_db_connections: usize,
    /// Teto de conexões simultâneas
    pub max_db_connections: usize,
    /// Operações simultâneas permitidas em `run_limited`
    pub max_concurrent_operations: usize,
    /// Intervalo da limpeza periódica
    #[serde(with = "duration_secs")]
    pub cleanup_interval: Duration,
    /// Idade máxima de um recurso registrado
    #[serde(with = "duration_secs")]
    pub max_resource_age: Duration,
    /// Ociosidade máxima na limpeza periódica
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,
    /// Ociosidade máxima na limpeza emergencial
    #[serde(with = "duration_secs")]
    pub emergency_idle_timeout: Duration,
    /// Máximo de recursos encerrados por limpeza emergencial
    pub emergency_cleanup_limit: usize,
    /// Timeout para obter uma conexão do pool
    #[serde(with = "duration_secs")]
    pub connection_timeout: Duration,
    /// Conexões ociosas além deste tempo são recicladas
    #[serde(with = "duration_secs")]
    pub max_inactive_connection_lifetime: Duration,
    /// Intervalo de amostragem do monitor de memória
    #[serde(with = "duration_secs")]
    pub memory_check_interval: Duration,
    /// Tempo máximo de cada callback de alerta de memória
    #[serde(with = "duration_secs")]
    pub callback_timeout: Duration,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: 2048.0,
            memory_warning_threshold: 0.8,
            min_db_connections: 2,
            max_db_connections: 10,
            max_concurrent_operations: 50,
            cleanup_interval: Duration::from_secs(300),
            max_resource_age: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(1800),
            emergency_idle_timeout: Duration::from_secs(300),
            emergency_cleanup_limit: 64,
            connection_timeout: Duration::from_secs(30),
            max_inactive_connection_lifetime: Duration::from_secs(300),
            memory_check_interval: Duration::from_secs(30),
            callback_timeout: Duration::from_secs(10),
        }
    }
}

impl ResourceLimits {
    /// Valida os limites configurados
    pub fn validate(&self) -> Result<()> {
        if self.max_memory_mb <= 0.0 {
            return Err(Error::Config("max_memory_mb deve ser positivo".into()));
        }
        if !(self.memory_warning_threshold > 0.0 && self.memory_warning_threshold <= 1.0) {
            return Err(Error::Config(format!(
                "memory_warning_threshold fora de (0, 1]: {}",
                self.memory_warning_threshold
            )));
        }
        if self.max_db_connections == 0 {
            return Err(Error::Config("max_db_connections deve ser maior que zero".into()));
        }
        if self.min_db_connections > self.max_db_connections {
            return Err(Error::Config(format!(
                "min_db_connections ({}) maior que max_db_connections ({})",
                self.min_db_connections, self.max_db_connections
            )));
        }
        if self.max_concurrent_operations == 0 {
            return Err(Error::Config("max_concurrent_operations deve ser maior que zero".into()));
        }
        if self.cleanup_interval.is_zero() || self.memory_check_interval.is_zero() {
            return Err(Error::Config("intervalos de limpeza e monitoramento não podem ser zero".into()));
        }
        Ok(())
    }
}

/// Configuração completa do processo
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub cache: CacheConfig,
    pub resources: ResourceLimits,
}

impl WardenConfig {
    /// Carrega os padrões sobrepostos pelas variáveis `WARDEN_*`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Igual a [`WardenConfig::from_env`], mas com uma fonte de variáveis arbitrária
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "WARDEN_CACHE_MAX_SIZE")? {
            config.cache.max_size = v;
        }
        if let Some(v) = parse_var(&lookup, "WARDEN_CACHE_MAX_MEMORY_MB")? {
            config.cache.max_memory_mb = v;
        }
        if let Some(v) = parse_var(&lookup, "WARDEN_CACHE_DEFAULT_TTL")? {
            config.cache.default_ttl = Duration::from_secs(v);
        }
        if let Some(v) = parse_var(&lookup, "WARDEN_MAX_MEMORY_MB")? {
            config.resources.max_memory_mb = v;
        }
        if let Some(v) = parse_var(&lookup, "WARDEN_MEMORY_WARNING_THRESHOLD")? {
            config.resources.memory_warning_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "WARDEN_DB_MIN_CONNECTIONS")? {
            config.resources.min_db_connections = v;
        }
        if let Some(v) = parse_var(&lookup, "WARDEN_DB_MAX_CONNECTIONS")? {
            config.resources.max_db_connections = v;
        }
        if let Some(v) = parse_var(&lookup, "WARDEN_DB_CONNECTION_TIMEOUT")? {
            config.resources.connection_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var(&lookup, "WARDEN_CLEANUP_INTERVAL")? {
            config.resources.cleanup_interval = Duration::from_secs(v);
        }
        if let Some(v) = parse_var(&lookup, "WARDEN_MAX_RESOURCE_AGE")? {
            config.resources.max_resource_age = Duration::from_secs(v);
        }

        config.validate()?;
        tracing::debug!(
            cache_max_size = config.cache.max_size,
            max_memory_mb = config.resources.max_memory_mb,
            "configuração carregada do ambiente"
        );
        Ok(config)
    }

    /// Valida cache e limites de recursos
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.resources.validate()
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(None),
    }
}

/// Durações representadas em segundos (fracionários permitidos)
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom(format!("duração inválida: {}", secs)));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
