use super::error::SenderError;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The work done on every tick.
pub type FlushTask = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Periodic background task that ships buffered events.
///
/// Can be started once; stopping is idempotent.
pub struct Flusher {
    period: Duration,
    task: Option<FlushTask>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    started: bool,
}

impl Flusher {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            task: None,
            cancel: CancellationToken::new(),
            handle: None,
            started: false,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn set_task(&mut self, task: FlushTask) {
        self.task = Some(task);
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn start(&mut self) -> Result<(), SenderError> {
        if self.started {
            return Err(SenderError::Flusher("flusher already started".to_string()));
        }
        if self.period.is_zero() {
            return Err(SenderError::Flusher(
                "flusher period must be positive".to_string(),
            ));
        }
        let task = self
            .task
            .take()
            .ok_or_else(|| SenderError::Flusher("no flush task configured".to_string()))?;

        let period = self.period;
        let cancel = self.cancel.clone();
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => task().await,
                }
            }
            debug!("flusher stopped");
        }));
        self.started = true;
        debug!(period_ms = period.as_millis() as u64, "flusher started");
        Ok(())
    }

    /// Stops the task and waits for an in-flight tick to finish.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("flusher task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Flusher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Flusher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flusher")
            .field("period", &self.period)
            .field("started", &self.started)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_task(counter: Arc<AtomicU32>) -> FlushTask {
        Box::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_until_stopped() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut flusher = Flusher::new(Duration::from_secs(6));
        flusher.set_task(counting_task(counter.clone()));
        flusher.start().unwrap();

        tokio::time::sleep(Duration::from_millis(18_500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        flusher.stop().await;
        flusher.stop().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tracing_test::traced_test]
    #[tokio::test(start_paused = true)]
    async fn panicking_tick_is_reported_on_stop() {
        let mut flusher = Flusher::new(Duration::from_secs(1));
        flusher.set_task(Box::new(|| {
            async {
                let socket: Option<()> = None;
                socket.expect("flush exploded");
            }
            .boxed()
        }));
        flusher.start().unwrap();

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        flusher.stop().await;

        assert!(!flusher.is_running());
        assert!(logs_contain("flusher task ended abnormally"));
    }

    #[tokio::test]
    async fn starts_exactly_once() {
        let mut flusher = Flusher::new(Duration::from_secs(1));
        flusher.set_task(counting_task(Arc::new(AtomicU32::new(0))));
        flusher.start().unwrap();
        assert!(matches!(flusher.start(), Err(SenderError::Flusher(_))));
        flusher.stop().await;
    }

    #[tokio::test]
    async fn refuses_to_start_misconfigured() {
        let mut flusher = Flusher::new(Duration::ZERO);
        flusher.set_task(counting_task(Arc::new(AtomicU32::new(0))));
        assert!(flusher.start().is_err());

        let mut flusher = Flusher::new(Duration::from_secs(1));
        assert!(flusher.start().is_err());
    }
}
