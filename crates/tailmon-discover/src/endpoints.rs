//! Target enumeration: overlay peers to scrape endpoints.
//!
//! Turns the raw peer list into a stable, sorted set of scrape targets.
//! Peers register with hostnames like `tailmon/<exporter>/<node>`;
//! anything else on the overlay is ignored.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;

use tailmon_overlay::{OverlayStatus, Result, Status};

/// Hostname prefix identifying registered exporters.
pub const HOSTNAME_PREFIX: &str = "tailmon/";

/// Port every registered exporter serves on.
pub const SCRAPE_PORT: u16 = 80;

/// Node-name label value when a hostname carries no node segment.
pub const UNKNOWN_NODE: &str = "unknown";

/// Label key for the exporter name.
pub const LABEL_EXPORTER: &str = "__meta_tailmon_exporter_name";
/// Label key for the node name.
pub const LABEL_NODE: &str = "__meta_tailmon_node_name";
/// Label key for the overlay DNS name.
pub const LABEL_DNS: &str = "__meta_tailscale_dns_name";

/// One scrape target plus its label metadata, in the shape Prometheus
/// HTTP SD consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeEndpoint {
    /// Output sort key; not part of the document.
    #[serde(skip)]
    sort_addr: Option<IpAddr>,

    /// Exactly one `host:port` target per peer.
    pub targets: Vec<String>,

    /// Exporter name, node name, and overlay DNS name.
    pub labels: BTreeMap<String, String>,
}

/// Format an address as a scrape target (IPv6 gets brackets).
fn format_target(addr: IpAddr, port: u16) -> String {
    match addr {
        IpAddr::V4(v4) => format!("{v4}:{port}"),
        IpAddr::V6(v6) => format!("[{v6}]:{port}"),
    }
}

/// Build the sorted endpoint set from a full overlay status.
///
/// Peers without the registration prefix or without any assigned address
/// are skipped. A hostname with no node segment still yields an entry
/// with node `unknown`; a degraded label beats a dropped target.
#[must_use]
pub fn scrape_endpoints(status: &Status) -> Vec<ScrapeEndpoint> {
    let mut endpoints = Vec::new();

    for peer in status.peer.values() {
        let Some(rest) = peer.host_name.strip_prefix(HOSTNAME_PREFIX) else {
            continue;
        };
        // Prometheus scrapes every address we return for a target, so
        // exactly one per peer.
        let Some(addr) = peer.tailscale_ips.first().copied() else {
            continue;
        };

        let (exporter, node) = match rest.split_once('/') {
            Some((exporter, node)) => (exporter, node),
            None => (rest, UNKNOWN_NODE),
        };

        let labels = BTreeMap::from([
            (LABEL_EXPORTER.to_string(), exporter.to_string()),
            (LABEL_NODE.to_string(), node.to_string()),
            (LABEL_DNS.to_string(), peer.dns_name.clone()),
        ]);

        endpoints.push(ScrapeEndpoint {
            sort_addr: Some(addr),
            targets: vec![format_target(addr, SCRAPE_PORT)],
            labels,
        });
    }

    endpoints.sort_by_key(|e| e.sort_addr);
    endpoints
}

/// Query the full peer status and enumerate scrape endpoints.
///
/// # Errors
///
/// Propagates the overlay query error; no partial results on that path.
pub async fn enumerate<S>(overlay: &S) -> Result<Vec<ScrapeEndpoint>>
where
    S: OverlayStatus + Sync,
{
    let status = overlay.full_status().await?;
    Ok(scrape_endpoints(&status))
}

/// Serialize endpoints as the HTTP SD document: an indented array of
/// `{"targets": [...], "labels": {...}}` objects.
///
/// # Errors
///
/// Returns error if serialization fails.
pub fn render_sd(endpoints: &[ScrapeEndpoint]) -> serde_json::Result<String> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    serde::Serialize::serialize(endpoints, &mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
