use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessExt, System, SystemExt};
use tracing::{debug, error, info, warn};
use warden_core::{MemoryProbe, PeriodicTask, Reclaimable, ResourceLimits};

/// Callback disparado quando o uso de memória passa do limite de alerta
pub type MemoryCallback = Arc<dyn Fn(f64) -> BoxFuture<'static, ()> + Send + Sync>;

const MAX_HISTORY: usize = 120;

/// Lê a memória residente do processo atual via sysinfo
pub struct SysinfoProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("não foi possível obter o pid do processo: {}", e);
                None
            }
        };
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn resident_mb(&self) -> f64 {
        let Some(pid) = self.pid else {
            return 0.0;
        };
        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            return 0.0;
        }
        system
            .process(pid)
            .map(|process| process.memory() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0)
    }
}

/// Amostra de uso de memória
#[derive(Debug, Clone, Serialize)]
pub struct MemorySample {
    pub timestamp: DateTime<Utc>,
    pub usage_mb: f64,
    pub fraction: f64,
    pub warning: bool,
}

/// Monitor de memória do processo.
///
/// Amostra a memória residente em intervalos fixos e, acima do limite de
/// alerta, dispara os callbacks registrados e pede aos `Reclaimable` que
/// liberem o que puderem.
pub struct MemoryMonitor {
    probe: Arc<dyn MemoryProbe>,
    max_memory_mb: f64,
    warning_threshold: f64,
    check_interval: Duration,
    callback_timeout: Duration,
    callbacks: DashMap<u64, MemoryCallback>,
    next_callback_id: AtomicU64,
    reclaimers: RwLock<Vec<Arc<dyn Reclaimable>>>,
    history: RwLock<VecDeque<MemorySample>>,
    warnings: AtomicU64,
    task: PeriodicTask,
}

impl MemoryMonitor {
    pub fn new(limits: &ResourceLimits, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            probe,
            max_memory_mb: limits.max_memory_mb,
            warning_threshold: limits.memory_warning_threshold,
            check_interval: limits.memory_check_interval,
            callback_timeout: limits.callback_timeout,
            callbacks: DashMap::new(),
            next_callback_id: AtomicU64::new(1),
            reclaimers: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::with_capacity(MAX_HISTORY)),
            warnings: AtomicU64::new(0),
            task: PeriodicTask::new("memory-monitor"),
        }
    }

    /// Memória residente atual em MB
    pub fn get_usage_mb(&self) -> f64 {
        self.probe.resident_mb()
    }

    /// Uso atual como fração de `max_memory_mb`
    pub fn usage_fraction(&self) -> f64 {
        self.get_usage_mb() / self.max_memory_mb
    }

    /// Última amostra registrada, se houver
    pub fn last_sample(&self) -> Option<MemorySample> {
        self.history.read().back().cloned()
    }

    /// Uso registrado na última amostra, se houver
    pub fn last_usage_mb(&self) -> Option<f64> {
        self.history.read().back().map(|sample| sample.usage_mb)
    }

    /// Histórico recente de amostras, da mais antiga para a mais nova
    pub fn history(&self) -> Vec<MemorySample> {
        self.history.read().iter().cloned().collect()
    }

    /// Registra um callback de alerta e retorna seu identificador
    pub fn add_callback<F, Fut>(&self, callback: F) -> u64
    where
        F: Fn(f64) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_callback_id.fetch_add(1, Ordering::SeqCst);
        let callback: MemoryCallback = Arc::new(move |usage| Box::pin(callback(usage)) as BoxFuture<'static, ()>);
        self.callbacks.insert(id, callback);
        id
    }

    pub fn remove_callback(&self, id: u64) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    /// Registra um componente que pode liberar memória sob pressão
    pub fn add_reclaimable(&self, reclaimable: Arc<dyn Reclaimable>) {
        self.reclaimers.write().push(reclaimable);
    }

    /// Pede a todos os `Reclaimable` que liberem memória.
    ///
    /// Retorna o total de itens descartados.
    pub fn request_reclaim(&self) -> usize {
        let reclaimers: Vec<_> = self.reclaimers.read().iter().cloned().collect();
        let mut total = 0;
        for reclaimable in reclaimers {
            let released = reclaimable.reclaim();
            if released > 0 {
                debug!(component = reclaimable.name(), released, "memória recuperada");
            }
            total += released;
        }
        total
    }

    pub fn warning_count(&self) -> u64 {
        self.warnings.load(Ordering::SeqCst)
    }

    /// Faz uma amostragem e dispara os callbacks se o limite foi excedido.
    ///
    /// Os callbacks rodam concorrentemente, cada um limitado por
    /// `callback_timeout`; um callback lento ou com panic não afeta os demais.
    /// Retorna `true` quando o alerta foi disparado.
    pub async fn check_once(&self) -> bool {
        let usage_mb = self.get_usage_mb();
        let fraction = usage_mb / self.max_memory_mb;
        let warning = fraction > self.warning_threshold;

        {
            let mut history = self.history.write();
            if history.len() >= MAX_HISTORY {
                history.pop_front();
            }
            history.push_back(MemorySample {
                timestamp: Utc::now(),
                usage_mb,
                fraction,
                warning,
            });
        }

        if !warning {
            debug!(usage_mb, fraction, "uso de memória dentro do limite");
            return false;
        }

        self.warnings.fetch_add(1, Ordering::SeqCst);
        warn!(
            usage_mb,
            max_memory_mb = self.max_memory_mb,
            fraction,
            "uso de memória acima do limite de alerta"
        );

        let callbacks: Vec<(u64, MemoryCallback)> = self
            .callbacks
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let timeout = self.callback_timeout;
        let runs = callbacks.into_iter().map(|(id, callback)| async move {
            let call = AssertUnwindSafe(callback(usage_mb)).catch_unwind();
            match tokio::time::timeout(timeout, call).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => error!(callback_id = id, "callback de memória entrou em panic"),
                Err(_) => warn!(
                    callback_id = id,
                    timeout_ms = timeout.as_millis() as u64,
                    "callback de memória excedeu o timeout"
                ),
            }
        });
        join_all(runs).await;

        let reclaimed = self.request_reclaim();
        info!(reclaimed, "requisição de recuperação de memória concluída");
        true
    }

    /// Inicia o laço de monitoramento; retorna `false` se já estava rodando
    pub fn start(self: &Arc<Self>) -> bool {
        let monitor = Arc::downgrade(self);
        let started = self.task.start(self.check_interval, move || {
            let monitor = monitor.clone();
            async move {
                match monitor.upgrade() {
                    Some(monitor) => {
                        monitor.check_once().await;
                        true
                    }
                    None => false,
                }
            }
        });
        if started {
            info!(
                interval_secs = self.check_interval.as_secs_f64(),
                threshold = self.warning_threshold,
                "monitor de memória iniciado"
            );
        }
        started
    }

    /// Para o laço e aguarda a amostragem em andamento terminar
    pub async fn stop(&self) {
        self.task.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }
}
