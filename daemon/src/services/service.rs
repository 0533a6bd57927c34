use tokio::sync::watch;

/// A long running background task owned by the application.
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs until `stop` turns `true`.
    async fn run(&self, stop: watch::Receiver<bool>);
}
