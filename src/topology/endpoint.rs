//! Control-API address resolution from profile content.
//!
//! Only `experimental.clash_api.{external_controller,secret}` is read. A missing field is
//! `Absent`; a present-but-unusable one is `Malformed`.

use crate::error::EndpointIssue;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoint {
    pub host: String,
    pub port: u16,
    pub secret: Option<String>,
}

impl Endpoint {
    pub fn base_url(&self) -> String {
        if self.host.contains(':') {
            format!("http://[{}]:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

#[derive(Deserialize)]
struct ProfileDocument {
    #[serde(default)]
    experimental: Option<Experimental>,
}

#[derive(Deserialize)]
struct Experimental {
    #[serde(default)]
    clash_api: Option<ClashApi>,
}

#[derive(Deserialize)]
struct ClashApi {
    #[serde(default)]
    external_controller: Option<Value>,
    #[serde(default)]
    secret: Option<Value>,
}

pub(crate) fn resolve(content: &str) -> Result<Endpoint, EndpointIssue> {
    let doc: ProfileDocument = serde_json::from_str(content)
        .map_err(|e| EndpointIssue::Malformed(format!("profile content: {e}")))?;
    let Some(api) = doc.experimental.and_then(|e| e.clash_api) else {
        return Err(EndpointIssue::Absent);
    };

    let address = match api.external_controller {
        None | Some(Value::Null) => return Err(EndpointIssue::Absent),
        Some(Value::String(s)) if s.trim().is_empty() => return Err(EndpointIssue::Absent),
        Some(Value::String(s)) => s,
        Some(other) => {
            return Err(EndpointIssue::Malformed(format!(
                "external_controller must be a string, got {other}"
            )))
        }
    };
    let secret = match api.secret {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    };

    let (host, port) = split_host_port(address.trim())?;
    Ok(Endpoint { host, port, secret })
}

/// Parse `host:port` / `[v6]:port`. Wildcard or empty hosts are dialled on loopback.
fn split_host_port(address: &str) -> Result<(String, u16), EndpointIssue> {
    let malformed = |why: &str| EndpointIssue::Malformed(format!("{address}: {why}"));

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, port) = rest
            .split_once("]:")
            .ok_or_else(|| malformed("expected [host]:port"))?;
        (host, port)
    } else {
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| malformed("expected host:port"))?;
        if host.contains(':') {
            return Err(malformed("IPv6 hosts must be bracketed"));
        }
        (host, port)
    };

    let port: u16 = port.parse().map_err(|_| malformed("invalid port"))?;
    if port == 0 {
        return Err(malformed("port 0 is not dialable"));
    }
    let host = match host {
        "" | "0.0.0.0" => "127.0.0.1",
        "::" => "::1",
        other => other,
    };
    Ok((host.to_string(), port))
}
