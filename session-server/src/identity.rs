//! Client for the external identity/chart/record HTTP service.
//!
//! Grounded in `valence_network`'s `session_server`/`connect.rs` pattern of
//! a shared `reqwest::Client`, a GET with a bearer/query credential, and a
//! `resp.json::<T>()` deserialize — the closest pack analogue to an
//! authoritative server validating a client-supplied credential against an
//! upstream service.

use std::time::Duration;

use protocol::{ChartInfo, RecordInfo, UserId};
use serde::Deserialize;

/// Identity info returned by `GET /me`.
#[derive(Debug, Clone, Deserialize)]
pub struct MeResponse {
    pub id: UserId,
    pub name: String,
    pub language: String,
}

#[derive(Clone)]
pub struct IdentityClient {
    http: reqwest::Client,
    base_url: String,
}

impl IdentityClient {
    pub fn new(base_url: String, timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("reqwest client configuration is valid");
        Self { http, base_url }
    }

    /// `GET {base}/me` with `Authorization: Bearer <token>`.
    pub async fn me(&self, token: &str) -> anyhow::Result<MeResponse> {
        let url = format!("{}/me", self.base_url);
        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json::<MeResponse>().await?)
    }

    /// `GET {base}/chart/{id}`.
    pub async fn chart(&self, id: i32) -> anyhow::Result<ChartInfo> {
        let url = format!("{}/chart/{}", self.base_url, id);
        let resp = self.http.get(url).send().await?.error_for_status()?;
        Ok(resp.json::<ChartInfo>().await?)
    }

    /// `GET {base}/record/{id}`.
    pub async fn record(&self, id: i32) -> anyhow::Result<RecordInfo> {
        let url = format!("{}/record/{}", self.base_url, id);
        let resp = self.http.get(url).send().await?.error_for_status()?;
        Ok(resp.json::<RecordInfo>().await?)
    }
}
