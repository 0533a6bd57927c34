use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::service::Service;

pub struct GracefulShutdown {
    services: Vec<Arc<dyn Service>>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        Self { services: vec![] }
    }

    pub fn add_service(&mut self, service: impl Service + 'static) {
        self.services.push(Arc::new(service));
    }

    /// Runs every service until ctrl+c (or `stop` turning `true`), then waits for them
    /// to wind down.
    pub async fn watch(mut self, stop: watch::Sender<bool>) {
        let mut join_set = JoinSet::new();
        for service in self.services.drain(..) {
            let receiver = stop.subscribe();
            join_set.spawn(async move {
                debug!("service {} started", service.name());
                service.run(receiver).await;
                debug!("service {} finished", service.name());
            });
        }

        let mut stopped = stop.subscribe();
        tokio::select! {
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => info!("shutdown requested"),
                Err(err) => error!("can't listen for ctrl+c: {}", err),
            },
            _ = stopped.wait_for(|stop| *stop) => {}
        }
        stop.send_replace(true);
        join_set.join_all().await;
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Flag(Arc<AtomicBool>);

    #[async_trait::async_trait]
    impl Service for Flag {
        fn name(&self) -> &'static str {
            "flag"
        }

        async fn run(&self, mut stop: watch::Receiver<bool>) {
            let _ = stop.wait_for(|stop| *stop).await;
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn services_observe_stop() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut gs = GracefulShutdown::new();
        gs.add_service(Flag(finished.clone()));

        let (tx, _rx) = watch::channel(false);
        let trigger = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.send_replace(true);
        });
        tokio::time::timeout(Duration::from_secs(5), gs.watch(tx))
            .await
            .unwrap();
        assert!(finished.load(Ordering::SeqCst));
    }
}
