//! LogDeliver - emits formatted output via tracing

use contracts::{ContractError, Deliver, FormattedOutput};
use tracing::{info, instrument};

/// Delivery that logs every output; never fails
pub struct LogDeliver {
    name: String,
}

impl LogDeliver {
    /// Create a new LogDeliver with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Deliver for LogDeliver {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "log_deliver", skip(self, output), fields(sink = %self.name))]
    async fn deliver(&mut self, output: &FormattedOutput) -> Result<(), ContractError> {
        info!(sink = %self.name, output = %output.to_text(), "Record delivered");
        Ok(())
    }

    #[instrument(name = "log_deliver_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, "LogDeliver closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_deliver() {
        let mut sink = LogDeliver::new("my_logger");
        assert_eq!(sink.name(), "my_logger");
        let result = sink
            .deliver(&FormattedOutput::Text("{\"id\":\"a\"}".into()))
            .await;
        assert!(result.is_ok());
        assert!(sink.close().await.is_ok());
    }
}
