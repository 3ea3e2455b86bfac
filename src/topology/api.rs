//! HTTP calls against the process's Clash-compatible control API.

use super::endpoint::Endpoint;
use crate::error::{CoreError, Result};
use crate::model::{LatencyResult, ProbeSettings, ProxyGroup, Topology};
use reqwest::{Method, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Extra headroom on top of the probe timeout before the HTTP request itself gives up.
const PROBE_SLACK: Duration = Duration::from_secs(2);

#[derive(Deserialize)]
struct ProxiesResponse {
    #[serde(default)]
    proxies: BTreeMap<String, ProxyGroup>,
}

#[derive(Serialize)]
struct SelectBody<'a> {
    name: &'a str,
}

#[derive(Clone)]
pub(crate) struct ControlApi {
    http: reqwest::Client,
    base: Url,
    secret: Option<String>,
}

impl ControlApi {
    pub fn new(http: reqwest::Client, endpoint: &Endpoint) -> Result<Self> {
        let base = Url::parse(&endpoint.base_url())
            .map_err(|e| CoreError::Upstream(format!("bad control API address: {e}")))?;
        Ok(Self {
            http,
            base,
            secret: endpoint.secret.clone(),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Build a URL from raw path segments; each one is percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| CoreError::Upstream(format!("{} cannot carry a path", self.base)))?
            .clear()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let req = self.http.request(method, url);
        match &self.secret {
            Some(secret) => req.bearer_auth(secret),
            None => req,
        }
    }

    pub async fn proxies(&self) -> Result<Topology> {
        let url = self.url(&["proxies"])?;
        let resp = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(upstream)?;
        let body: ProxiesResponse = check(resp).await?.json().await.map_err(upstream)?;

        Ok(body
            .proxies
            .into_iter()
            .map(|(key, mut group)| {
                if group.name.is_empty() {
                    group.name = key.clone();
                }
                (key, group)
            })
            .collect())
    }

    pub async fn select(&self, group: &str, node: &str) -> Result<()> {
        let url = self.url(&["proxies", group])?;
        let resp = self
            .request(Method::PUT, url)
            .json(&SelectBody { name: node })
            .send()
            .await
            .map_err(upstream)?;
        check(resp).await?;
        Ok(())
    }

    pub async fn group_delay(&self, group: &str, probe: &ProbeSettings) -> Result<LatencyResult> {
        let mut url = self.url(&["group", group, "delay"])?;
        url.query_pairs_mut()
            .append_pair("url", &probe.url)
            .append_pair("timeout", &probe.timeout.as_millis().to_string());

        let resp = self
            .request(Method::GET, url)
            .timeout(probe.timeout + PROBE_SLACK)
            .send()
            .await
            .map_err(upstream)?;
        let raw: BTreeMap<String, serde_json::Value> =
            check(resp).await?.json().await.map_err(upstream)?;

        // Nodes that timed out may be reported with a non-numeric value; they carry no data.
        Ok(raw
            .into_iter()
            .filter_map(|(node, v)| v.as_u64().map(|ms| (node, ms)))
            .collect())
    }
}

fn upstream(e: reqwest::Error) -> CoreError {
    CoreError::Upstream(e.to_string())
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let detail = extract_message(&body).unwrap_or(body);
    Err(CoreError::Upstream(if detail.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {detail}")
    }))
}

/// Clash error bodies look like `{"message":"..."}`.
fn extract_message(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    v.get("message")?.as_str().map(str::to_string)
}
