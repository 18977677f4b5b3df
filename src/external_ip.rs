//! `--resolve-ip-https`: ask a web service which address we appear from.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::dns_resolver::ResolveError;

const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
struct IpResponse {
    ip: String,
}

/// Pulls an IPv4 address out of a service reply. JSON `{"ip": "..."}` and
/// bare text bodies are both accepted.
pub fn parse_ip_response(body: &str) -> Option<Ipv4Addr> {
    let body = body.trim();
    let candidate = match serde_json::from_str::<IpResponse>(body) {
        Ok(resp) => resp.ip,
        Err(_) => body.to_string(),
    };
    candidate.trim().parse().ok()
}

pub async fn resolve_external_ip(url: &str) -> Result<Ipv4Addr, ResolveError> {
    let fail = |reason: String| ResolveError::External {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(RESOLVE_TIMEOUT)
        .build()
        .map_err(|e| fail(e.to_string()))?;
    debug!("Resolving external IP via {url}");

    let response = client
        .get(url)
        .header("Accept", "application/json, text/plain")
        .send()
        .await
        .map_err(|e| fail(e.to_string()))?;
    if !response.status().is_success() {
        return Err(fail(format!("HTTP status {}", response.status())));
    }
    let body = response.text().await.map_err(|e| fail(e.to_string()))?;

    let ip = parse_ip_response(&body).ok_or_else(|| fail("no IPv4 address in response".to_string()))?;
    info!("    Resolved external IP (via {url}) as: {ip}");
    Ok(ip)
}
