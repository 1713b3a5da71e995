//! Status documents from the overlay's local API.
//!
//! These mirror the JSON shape of `tailscale status --json`. Only the
//! fields tailmon consumes are modeled; unknown fields are ignored.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

use crate::error::Result;

/// Backend state value reported once the node is authenticated and up.
pub const BACKEND_RUNNING: &str = "Running";

/// Full status of the local overlay node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Status {
    /// Backend state (e.g., "Running", "`NeedsLogin`").
    pub backend_state: String,

    /// URL to visit when interactive authentication is required.
    #[serde(rename = "AuthURL", default)]
    pub auth_url: String,

    /// Health warnings reported by the backend.
    #[serde(default)]
    pub health: Vec<String>,

    /// This node's information.
    #[serde(rename = "Self")]
    pub self_node: Option<SelfStatus>,

    /// Known peers, keyed by public key. Empty for peerless queries.
    #[serde(default)]
    pub peer: HashMap<String, PeerStatus>,
}

impl Status {
    /// Whether the backend has finished authenticating and is up.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.backend_state == BACKEND_RUNNING
    }
}

/// Information about the local node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SelfStatus {
    /// Node ID.
    #[serde(rename = "ID")]
    pub id: String,
    /// Hostname as registered on the overlay.
    #[serde(default)]
    pub host_name: String,
    /// Fully qualified overlay DNS name.
    #[serde(rename = "DNSName", default)]
    pub dns_name: String,
    /// Assigned overlay addresses.
    #[serde(rename = "TailscaleIPs", default)]
    pub tailscale_ips: Vec<IpAddr>,
}

/// Status of a peer node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PeerStatus {
    /// Node ID.
    #[serde(rename = "ID", default)]
    pub id: String,
    /// Hostname as registered on the overlay.
    #[serde(default)]
    pub host_name: String,
    /// Fully qualified overlay DNS name.
    #[serde(rename = "DNSName", default)]
    pub dns_name: String,
    /// Assigned overlay addresses.
    #[serde(rename = "TailscaleIPs", default)]
    pub tailscale_ips: Vec<IpAddr>,
    /// Whether the peer is currently online.
    #[serde(default)]
    pub online: bool,
}

/// Narrow status-query capability of an overlay handle.
///
/// The presence manager's auth watcher needs only the local view; the
/// discovery enumerator needs the full peer list. Nothing else of the
/// provider's surface is exposed through this trait, so tests can stand
/// in with an in-memory fake.
pub trait OverlayStatus {
    /// Query the local node's status, without the peer list.
    fn local_status(&self) -> impl Future<Output = Result<Status>> + Send;

    /// Query the full status, including all known peers.
    fn full_status(&self) -> impl Future<Output = Result<Status>> + Send;
}
