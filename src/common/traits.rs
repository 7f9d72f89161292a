use crate::Result;

/// Common interface for long-running relay servers
#[allow(async_fn_in_trait)]
pub trait RelayServerTrait {
    /// Starts accepting connections until shut down
    async fn run(&self) -> Result<()>;

    /// Returns a shutdown signal sender that can be used to gracefully shutdown the server
    fn shutdown_signal(&self) -> tokio::sync::broadcast::Sender<()>;
}
