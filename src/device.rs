// HTTP transport layer for talking to the card.
//
// Protocol: every request is a GET.
//   read:  http://{ip}/v.api/apis/EV/GET/parameter/{id}          -> {"value": ...}
//   write: http://{ip}/v.api/apis/EV/SET/parameter/{id}/{value}  -> body ignored

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::coerce;
use crate::error::TransportError;

const BASE_API: &str = "v.api/apis/EV";
// Parameter 1 holds the card's product name.
const PROBE_PARAMETER: &str = "1";

/// Blocking-per-request fetch primitive.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

/// `reqwest`-backed transport. The client timeout bounds every request.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(HttpTransport { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let transport_err = |e: reqwest::Error| {
            if e.is_timeout() {
                TransportError::Timeout {
                    url: url.to_string(),
                }
            } else {
                TransportError::Connect {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let response = self.client.get(url).send().await.map_err(transport_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(transport_err)?;
        Ok(body.to_vec())
    }
}

/// A card at a fixed address. Cheap to clone; batches each hold their own.
#[derive(Clone)]
pub struct Device {
    ip: Ipv4Addr,
    transport: Arc<dyn Transport>,
}

impl Device {
    pub fn new(ip: Ipv4Addr, transport: Arc<dyn Transport>) -> Self {
        Device { ip, transport }
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn get_url(&self, id: &str) -> String {
        format!("http://{}/{}/GET/parameter/{}", self.ip, BASE_API, id)
    }

    pub fn set_url(&self, id: &str, value: &str) -> String {
        format!("http://{}/{}/SET/parameter/{}/{}", self.ip, BASE_API, id, value)
    }

    /// Read one parameter, returning the raw response body.
    pub async fn read(&self, id: &str) -> Result<Vec<u8>, TransportError> {
        let url = self.get_url(id);
        debug!(%url, "GET parameter");
        self.transport.fetch(&url).await
    }

    /// Write one parameter. The response body is discarded.
    pub async fn write(&self, id: &str, value: &str) -> Result<(), TransportError> {
        let url = self.set_url(id, value);
        debug!(%url, "SET parameter");
        self.transport.fetch(&url).await.map(|_| ())
    }

    /// Ask the card for its identity. Used to confirm an address before saving it.
    pub async fn probe(&self) -> Result<String> {
        let body = self
            .read(PROBE_PARAMETER)
            .await
            .with_context(|| format!("Cannot connect to {}", self.ip))?;
        let value = coerce::extract_value(&body)
            .with_context(|| format!("{} did not answer like a card", self.ip))?;
        Ok(match value {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::memory::{Canned, MemoryTransport};

    #[test]
    fn url_scheme() {
        let device = MemoryTransport::new().device();
        assert_eq!(
            device.get_url("850.2@i"),
            "http://10.0.0.5/v.api/apis/EV/GET/parameter/850.2@i"
        );
        assert_eq!(
            device.set_url("530.3.12@i", "42"),
            "http://10.0.0.5/v.api/apis/EV/SET/parameter/530.3.12@i/42"
        );
    }

    #[tokio::test]
    async fn probe_reports_card_name() {
        let card = MemoryTransport::new();
        card.set("1", "NEXX-SDI");
        assert_eq!(card.device().probe().await.unwrap(), "NEXX-SDI");
    }

    #[tokio::test]
    async fn probe_fails_on_unreachable_card() {
        let card = MemoryTransport::new();
        card.script("1", Canned::Unreachable);
        let err = card.device().probe().await.unwrap_err();
        assert!(err.to_string().contains("Cannot connect to 10.0.0.5"));
    }

    #[tokio::test]
    async fn write_then_read() {
        let card = MemoryTransport::new();
        let device = card.device();
        device.write("343@i", "42").await.unwrap();
        let body = device.read("343@i").await.unwrap();
        assert_eq!(crate::coerce::decode_value(&body).unwrap(), 42);
        assert_eq!(card.requests().len(), 2);
    }
}
