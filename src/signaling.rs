//! HTTP SDP signaling.
//!
//! Session establishment is one request: POST the local offer SDP to the
//! signaling endpoint with the language pair in the query string, get the
//! answer SDP back in the body. No trickle, no retries, no session state on
//! this path.

use crate::error::{Error, Result};
use crate::lang::LanguageCode;
use std::time::Duration;

/// Whole-exchange deadline. Covers connect, request and body read.
const SIGNALING_TIMEOUT: Duration = Duration::from_secs(20);

/// Client for the one-shot offer/answer exchange.
#[derive(Debug, Clone)]
pub struct SignalingClient {
    http: reqwest::Client,
    endpoint: String,
}

impl SignalingClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// POST the offer, return the answer SDP.
    ///
    /// `recLang` carries Party A's language, `patLang` Party B's; the
    /// parameter names are fixed by the service.
    pub async fn exchange_offer(
        &self,
        offer_sdp: &str,
        party_a: LanguageCode,
        party_b: LanguageCode,
    ) -> Result<String> {
        let url = format!(
            "{}?recLang={}&patLang={}",
            self.endpoint,
            urlencoding::encode(party_a.as_str()),
            urlencoding::encode(party_b.as_str()),
        );
        tracing::debug!(
            endpoint = %self.endpoint,
            party_a = party_a.as_str(),
            party_b = party_b.as_str(),
            offer_len = offer_sdp.len(),
            "posting SDP offer"
        );

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/sdp")
            .body(offer_sdp.to_string())
            .timeout(SIGNALING_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Signaling(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Signaling(format!("endpoint returned HTTP {status}")));
        }

        let answer = response
            .text()
            .await
            .map_err(|e| Error::Signaling(format!("reading answer failed: {e}")))?;
        if answer.trim().is_empty() {
            return Err(Error::Signaling("empty answer SDP".into()));
        }
        tracing::debug!(answer_len = answer.len(), "received SDP answer");
        Ok(answer)
    }
}

// ── Tests ─────────────────────────────────────────────────────────
