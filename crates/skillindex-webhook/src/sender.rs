//! The HTTP leg of a delivery attempt.

use std::time::Duration;

use async_trait::async_trait;

use crate::signer::{SEQUENCE_HEADER, SIGNATURE_HEADER};

/// Transport seam for delivery attempts. `Ok(status)` is an HTTP response
/// of any status; `Err` is a transport failure (timeout, refused
/// connection, DNS). Both non-2xx statuses and transport errors count as
/// failed attempts.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        body: &[u8],
        signature: &str,
        sequence: u64,
    ) -> Result<u16, String>;
}

/// `reqwest`-backed transport with a per-request timeout.
pub struct HttpWebhookTransport {
    http: reqwest::Client,
}

impl HttpWebhookTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| format!("failed to build http client: {e}"))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl WebhookTransport for HttpWebhookTransport {
    async fn post(
        &self,
        url: &str,
        body: &[u8],
        signature: &str,
        sequence: u64,
    ) -> Result<u16, String> {
        let resp = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(SEQUENCE_HEADER, sequence.to_string())
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Ok(resp.status().as_u16())
    }
}
