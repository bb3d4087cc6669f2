//! HttpDeliver - form-encoded POST per delivery

use std::collections::HashMap;
use std::time::Duration;

use contracts::{ContractError, Deliver, FormattedOutput};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument};

/// Configuration for HttpDeliver
#[derive(Debug, Clone)]
pub struct HttpDeliverConfig {
    /// Endpoint receiving the POST
    pub url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl HttpDeliverConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let url = params
            .get("url")
            .cloned()
            .ok_or_else(|| "missing 'url' parameter".to_string())?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(format!("url '{url}' must start with http:// or https://"));
        }

        let timeout_ms = match params.get("timeout_ms") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|e| format!("invalid timeout_ms '{raw}': {e}"))?,
            None => 10_000,
        };

        Ok(Self {
            url,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

/// Delivery that POSTs each output to a URL
///
/// Form outputs are sent `application/x-www-form-urlencoded`, text outputs as
/// `text/plain`. Any non-2xx status is a failed attempt.
pub struct HttpDeliver {
    name: String,
    config: HttpDeliverConfig,
    client: reqwest::Client,
}

impl HttpDeliver {
    /// Create a new HttpDeliver
    ///
    /// Fails when the HTTP client (and with it the request timeout) cannot
    /// be set up.
    pub fn new(
        name: impl Into<String>,
        config: HttpDeliverConfig,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ContractError::delivery(&name, format!("http client: {e}")))?;
        Ok(Self {
            name,
            config,
            client,
        })
    }

    /// Create from params (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let config = HttpDeliverConfig::from_params(params)
            .map_err(|e| ContractError::delivery(&name, e))?;
        Self::new(name, config)
    }
}

impl Deliver for HttpDeliver {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "http_deliver",
        skip(self, output),
        fields(sink = %self.name, url = %self.config.url)
    )]
    async fn deliver(&mut self, output: &FormattedOutput) -> Result<(), ContractError> {
        let request = self.client.post(&self.config.url);
        let request = match output {
            FormattedOutput::Form(pairs) => request.form(pairs),
            FormattedOutput::Text(text) => request
                .header(CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(text.clone()),
        };

        let response = request
            .send()
            .await
            .map_err(|e| ContractError::delivery_connection(&self.name, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ContractError::delivery(
                &self.name,
                format!("server responded {status}"),
            ));
        }

        debug!(sink = %self.name, status = status.as_u16(), "Posted");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        debug!(sink = %self.name, "HttpDeliver closed");
        Ok(())
    }
}
