//! Maturity signal handlers.

use tokio::sync::mpsc;
use tracing::{info, warn};

use pyramid_core::MaturitySignal;

use crate::types::{EngineError, Result};

/// Receives a signal whenever a pyramid becomes mature.
#[async_trait::async_trait]
pub trait MaturityHandler: Send + Sync {
    /// Handle one signal.
    async fn on_mature(&self, signal: &MaturitySignal) -> Result<()>;

    /// Name used in logs.
    fn name(&self) -> &str;
}

/// Default handler that logs signals.
pub struct LoggingMaturityHandler;

#[async_trait::async_trait]
impl MaturityHandler for LoggingMaturityHandler {
    async fn on_mature(&self, signal: &MaturitySignal) -> Result<()> {
        info!(
            pyramid_id = %signal.pyramid_id,
            subject = %signal.subject,
            variant = %signal.variant,
            completeness = signal.completeness,
            "Pyramid ready for a report"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}

/// Forwards signals to a channel, e.g. a report generator task.
pub struct ChannelMaturityHandler {
    tx: mpsc::Sender<MaturitySignal>,
}

impl ChannelMaturityHandler {
    /// Create a handler and the receiving end of its channel.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<MaturitySignal>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl MaturityHandler for ChannelMaturityHandler {
    async fn on_mature(&self, signal: &MaturitySignal) -> Result<()> {
        self.tx.send(signal.clone()).await.map_err(|_| {
            warn!(pyramid_id = %signal.pyramid_id, "Maturity receiver dropped");
            EngineError::Store("maturity signal receiver closed".to_string())
        })
    }

    fn name(&self) -> &str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pyramid_core::Variant;

    fn signal() -> MaturitySignal {
        MaturitySignal {
            pyramid_id: "relationship_bob".to_string(),
            subject: "Bob".to_string(),
            variant: Variant::Relationship,
            completeness: 71,
            triggered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_channel_handler_forwards() {
        let (handler, mut rx) = ChannelMaturityHandler::new(4);
        handler.on_mature(&signal()).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.pyramid_id, "relationship_bob");
    }

    #[tokio::test]
    async fn test_channel_handler_reports_closed_receiver() {
        let (handler, rx) = ChannelMaturityHandler::new(1);
        drop(rx);
        assert!(handler.on_mature(&signal()).await.is_err());
    }

    #[test]
    fn test_logging_handler() {
        let handler = LoggingMaturityHandler;
        assert_eq!(handler.name(), "logging");
        assert!(tokio_test::block_on(handler.on_mature(&signal())).is_ok());
    }
}
