//! Exporter registration parsing.

use thiserror::Error;

/// Prefix every tailmon overlay hostname starts with. The discovery
/// service identifies registered exporters by it.
pub const HOSTNAME_PREFIX: &str = "tailmon/";

/// Errors from parsing a `name:port` registration argument.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExporterParseError {
    /// No `:` separator in the argument.
    #[error("{input:?}: use name-exporter:port format")]
    MissingSeparator {
        /// The offending argument.
        input: String,
    },

    /// The name before the `:` is empty.
    #[error("{input:?}: exporter name is empty")]
    EmptyName {
        /// The offending argument.
        input: String,
    },

    /// The port is not a base-10 number in 1-65535.
    #[error("{input:?}: invalid port: {message}")]
    InvalidPort {
        /// The offending argument.
        input: String,
        /// Why the port was rejected.
        message: String,
    },
}

/// One exporter registration: name, localhost port, and the machine
/// hostname resolved at registration time. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct ExporterSpec {
    name: String,
    port: u16,
    hostname: String,
}

impl ExporterSpec {
    /// Parse a registration argument like `node-exporter:9100`.
    ///
    /// # Errors
    ///
    /// Returns error when the separator is missing, the name is empty,
    /// or the port is not a number in 1-65535.
    pub fn parse(value: &str) -> Result<Self, ExporterParseError> {
        Self::parse_with_hostname(value, local_hostname())
    }

    fn parse_with_hostname(value: &str, hostname: String) -> Result<Self, ExporterParseError> {
        let (name, port_str) =
            value
                .split_once(':')
                .ok_or_else(|| ExporterParseError::MissingSeparator {
                    input: value.to_string(),
                })?;

        if name.is_empty() {
            return Err(ExporterParseError::EmptyName {
                input: value.to_string(),
            });
        }

        let port: u16 = port_str
            .parse()
            .map_err(|e: std::num::ParseIntError| ExporterParseError::InvalidPort {
                input: value.to_string(),
                message: e.to_string(),
            })?;
        if port == 0 {
            return Err(ExporterParseError::InvalidPort {
                input: value.to_string(),
                message: "port must be 1-65535".to_string(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            port,
            hostname,
        })
    }

    /// The exporter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The localhost port the exporter listens on.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The machine hostname resolved at registration time.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Canonical overlay hostname: `tailmon/<name>/<hostname>`.
    #[must_use]
    pub fn overlay_hostname(&self) -> String {
        format!("{HOSTNAME_PREFIX}{}/{}", self.name, self.hostname)
    }

    /// Upstream base URL the proxy forwards to.
    #[must_use]
    pub fn upstream_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

/// The machine hostname, advisory only: used as a label for discovery,
/// never for routing, so resolution failure degrades to a sentinel.
fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn parse_valid_registration() {
        let spec = ExporterSpec::parse_with_hostname("node-exporter:9100", "host1".into())
            .expect("should parse");
        assert_eq!(spec.name(), "node-exporter");
        assert_eq!(spec.port(), 9100);
        assert_eq!(spec.overlay_hostname(), "tailmon/node-exporter/host1");
        assert_eq!(spec.upstream_url(), "http://localhost:9100");
    }

    #[test]
    fn parse_resolves_hostname_once() {
        let spec = ExporterSpec::parse("postgres-exporter:9187").expect("should parse");
        assert_eq!(
            spec.overlay_hostname(),
            format!("tailmon/postgres-exporter/{}", spec.hostname())
        );
    }

    #[test_case("node-exporter"; "missing separator")]
    #[test_case(":9100"; "empty name")]
    #[test_case("node-exporter:"; "empty port")]
    #[test_case("node-exporter:http"; "non numeric port")]
    #[test_case("node-exporter:0"; "port zero")]
    #[test_case("node-exporter:65536"; "port too large")]
    #[test_case("node-exporter:9100:extra"; "trailing separator")]
    fn parse_rejects_malformed_input(input: &str) {
        assert!(ExporterSpec::parse_with_hostname(input, "host1".into()).is_err());
    }

    #[test]
    fn parse_error_names_the_input() {
        let err = ExporterSpec::parse_with_hostname("bogus", "host1".into())
            .expect_err("must fail");
        assert!(err.to_string().contains("bogus"));
    }
}
