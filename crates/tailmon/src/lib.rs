//! tailmon - register prometheus exporters on an overlay network.
//!
//! Each registered exporter becomes its own overlay node named
//! `tailmon/<exporter>/<hostname>`. Requests to `/metrics` on port 80 of
//! that node are proxied to the exporter on localhost; everything else is
//! rejected with the node's name, which doubles as a manual liveness
//! check.

#![deny(unsafe_code)]

pub mod exporter;
pub mod proxy;

pub use exporter::{ExporterParseError, ExporterSpec};
pub use proxy::MetricsProxy;
