use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::engine::Dispatcher;

const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Periodically releases couriers whose delivery deadline has passed.
///
/// A failed tick is logged and retried on the next one.
pub async fn run_expiry_loop(
    dispatcher: Arc<dyn Dispatcher>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let interval = interval.max(MIN_INTERVAL);
    info!(interval_ms = interval.as_millis() as u64, "expiry sweep started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match dispatcher.release_expired().await {
            Ok(0) => {}
            Ok(released) => info!(released, "released couriers past their deadline"),
            Err(err) => error!(error = %err, "expiry sweep failed"),
        }
    }

    info!("expiry sweep stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::run_expiry_loop;
    use crate::engine::{Dispatcher, EngineError};
    use crate::models::delivery::{AssignResult, UnassignResult};
    use crate::storage::RepositoryError;

    #[derive(Default)]
    struct CountingDispatcher {
        sweeps: AtomicU64,
        fail_first: bool,
    }

    #[async_trait]
    impl Dispatcher for CountingDispatcher {
        async fn assign(&self, _order_id: &str) -> Result<AssignResult, EngineError> {
            Err(EngineError::NoAvailableCourier)
        }

        async fn unassign(&self, order_id: &str) -> Result<UnassignResult, EngineError> {
            Err(EngineError::DeliveryNotFound(order_id.to_string()))
        }

        async fn release_expired(&self) -> Result<u64, EngineError> {
            let n = self.sweeps.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                return Err(EngineError::Repository(RepositoryError::Unavailable(
                    "down".to_string(),
                )));
            }
            Ok(1)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_on_every_tick_until_cancelled() {
        let dispatcher = Arc::new(CountingDispatcher::default());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_expiry_loop(
            dispatcher.clone(),
            Duration::from_secs(30),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(95)).await;
        shutdown.cancel();
        handle.await.unwrap();

        // immediate first tick plus ticks at 30s, 60s and 90s
        assert_eq!(dispatcher.sweeps.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sweep_does_not_stop_the_loop() {
        let dispatcher = Arc::new(CountingDispatcher {
            fail_first: true,
            ..Default::default()
        });
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_expiry_loop(
            dispatcher.clone(),
            Duration::from_secs(10),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(25)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(dispatcher.sweeps.load(Ordering::SeqCst), 3);
    }
}
