//! Presence management for tailmon overlay identities.
//!
//! A [`PresenceServer`] owns one overlay identity's full lifecycle: it
//! creates the identity's state directory, brings the overlay handle up,
//! watches authentication progress in the background, serves HTTP on the
//! overlay listener, and tears everything down on shutdown.
//!
//! # Example
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use http_body_util::Full;
//! use hyper::{Request, Response};
//! use tailmon_presence::{NodeIdentity, PresenceServer};
//!
//! # async fn example() -> tailmon_presence::Result<()> {
//! let identity = NodeIdentity::new("tailmon/node-exporter/myhost", "/var/lib/tailmon");
//! let server = PresenceServer::new(identity);
//! server
//!     .start(|_req: Request<hyper::body::Incoming>| async {
//!         Response::new(Full::new(Bytes::from_static(b"ok\n")))
//!     })
//!     .await?;
//! // ... wait for a shutdown signal ...
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod identity;
pub mod server;

pub use error::{PresenceError, Result};
pub use identity::{sanitize_name, NodeIdentity};
pub use server::PresenceServer;
