//! tailmon-discover - Prometheus HTTP SD over the overlay network.
//!
//! Registers one node on the overlay and answers `GET /` with a
//! Prometheus HTTP service-discovery document listing every peer whose
//! hostname follows the `tailmon/` registration convention. Run one
//! discovery node alongside many `tailmon` exporters to scrape them all
//! without static configuration.

#![deny(unsafe_code)]

pub mod endpoints;
pub mod handler;

pub use endpoints::{enumerate, render_sd, scrape_endpoints, ScrapeEndpoint};
pub use handler::handle_discovery;
