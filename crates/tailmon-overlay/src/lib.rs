//! Overlay network provider for tailmon.
//!
//! The rest of tailmon never talks to the overlay transport directly; it
//! consumes the narrow contract in this crate: a status query interface
//! ([`OverlayStatus`]), a listener factory, and a close operation. The
//! production implementation, [`TailscaledOverlay`], runs one `tailscaled`
//! per node identity (own state directory, own control socket) and drives
//! it through the `tailscale` CLI.
//!
//! # Example
//!
//! ```rust,no_run
//! use tailmon_overlay::{OverlayConfig, OverlayStatus, TailscaledOverlay};
//!
//! # async fn example() -> tailmon_overlay::Result<()> {
//! let overlay = TailscaledOverlay::new(OverlayConfig {
//!     hostname: "tailmon/node-exporter/myhost".into(),
//!     ..Default::default()
//! });
//! overlay.connect().await?;
//! let status = overlay.local_status().await?;
//! println!("backend state: {}", status.backend_state);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod status;
pub mod tailscaled;

pub use error::{OverlayError, Result};
pub use status::{OverlayStatus, PeerStatus, SelfStatus, Status};
pub use tailscaled::{OverlayConfig, TailscaledOverlay};
