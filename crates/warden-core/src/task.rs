use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Laço periódico cooperativo em background.
///
/// `stop` sinaliza o laço, aguarda a task terminar e trata o cancelamento como
/// saída limpa. O laço também termina quando o `tick` retorna `false`.
pub struct PeriodicTask {
    name: &'static str,
    current: Mutex<Option<RunningLoop>>,
}

// cada execução tem sua própria flag: um laço antigo terminando não derruba o novo
struct RunningLoop {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
    running: Arc<AtomicBool>,
}

impl PeriodicTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            current: Mutex::new(None),
        }
    }

    /// Inicia o laço; retorna `false` se já estava rodando
    pub fn start<F, Fut>(&self, interval: Duration, mut tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|run| run.running.load(Ordering::SeqCst)) {
            return false;
        }

        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();
        let name = self.name;

        let handle = tokio::spawn(async move {
            debug!(task = name, interval_ms = interval.as_millis() as u64, "tarefa periódica iniciada");
            loop {
                tokio::select! {
                    _ = signal.notified() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if !flag.load(Ordering::SeqCst) || !tick().await {
                    break;
                }
            }
            flag.store(false, Ordering::SeqCst);
            debug!(task = name, "tarefa periódica encerrada");
        });

        *current = Some(RunningLoop {
            handle,
            shutdown,
            running,
        });
        true
    }

    pub fn is_running(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|run| run.running.load(Ordering::SeqCst))
    }

    /// Para o laço e aguarda sua conclusão
    pub async fn stop(&self) {
        let current = self.current.lock().take();
        if let Some(RunningLoop {
            handle,
            shutdown,
            running,
        }) = current
        {
            running.store(false, Ordering::SeqCst);
            // notify_one guarda a permissão se o laço estiver no meio de um tick
            shutdown.notify_one();
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(task = self.name, "tarefa periódica terminou com panic: {}", e);
                }
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(current) = self.current.get_mut().as_ref() {
            current.running.store(false, Ordering::SeqCst);
            current.shutdown.notify_one();
        }
    }
}
