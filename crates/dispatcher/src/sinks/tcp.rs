//! TcpDeliver - one short-lived connection per delivery

use std::collections::HashMap;
use std::time::Duration;

use contracts::{ContractError, Deliver, FormattedOutput};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument};

/// Configuration for TcpDeliver
#[derive(Debug, Clone)]
pub struct TcpDeliverConfig {
    /// Target `host:port`
    pub addr: String,
    /// Connect and write deadline
    pub timeout: Duration,
}

impl TcpDeliverConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let addr = params
            .get("addr")
            .cloned()
            .ok_or_else(|| "missing 'addr' parameter".to_string())?;

        let timeout_ms = match params.get("timeout_ms") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|e| format!("invalid timeout_ms '{raw}': {e}"))?,
            None => 5000,
        };

        Ok(Self {
            addr,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

/// Delivery that connects, writes the output plus a newline, and closes
pub struct TcpDeliver {
    name: String,
    config: TcpDeliverConfig,
}

impl TcpDeliver {
    /// Create a new TcpDeliver
    pub fn new(name: impl Into<String>, config: TcpDeliverConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Create from params (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let config = TcpDeliverConfig::from_params(params)
            .map_err(|e| ContractError::delivery(&name, e))?;
        Ok(Self::new(name, config))
    }

    async fn transmit(&self, payload: &[u8]) -> Result<(), ContractError> {
        let mut stream = TcpStream::connect(&self.config.addr).await.map_err(|e| {
            ContractError::delivery_connection(
                &self.name,
                format!("cannot connect to {}: {e}", self.config.addr),
            )
        })?;

        stream
            .write_all(payload)
            .await
            .map_err(|e| ContractError::delivery(&self.name, e.to_string()))?;
        stream
            .shutdown()
            .await
            .map_err(|e| ContractError::delivery(&self.name, e.to_string()))?;
        Ok(())
    }
}

impl Deliver for TcpDeliver {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "tcp_deliver",
        skip(self, output),
        fields(sink = %self.name, addr = %self.config.addr)
    )]
    async fn deliver(&mut self, output: &FormattedOutput) -> Result<(), ContractError> {
        let mut payload = output.to_text().into_bytes();
        payload.push(b'\n');

        timeout(self.config.timeout, self.transmit(&payload))
            .await
            .map_err(|_| {
                ContractError::delivery_connection(
                    &self.name,
                    format!("timed out after {:?}", self.config.timeout),
                )
            })??;

        debug!(sink = %self.name, bytes = payload.len(), "Sent");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        debug!(sink = %self.name, "TcpDeliver closed");
        Ok(())
    }
}
