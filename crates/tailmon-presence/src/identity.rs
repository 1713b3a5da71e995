//! Node identity and state-directory naming.

use std::path::PathBuf;

/// One overlay node identity.
///
/// Immutable after construction; the owning process builds one per
/// registered exporter (plus one for the discovery node) and hands it to
/// a [`PresenceServer`](crate::PresenceServer).
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    /// Logical name, used for the overlay hostname and state subdirectory.
    pub name: String,

    /// Custom control server URL. None uses the provider default.
    pub control_url: Option<String>,

    /// Root directory under which per-identity state subdirectories live.
    pub state_dir: PathBuf,

    /// Enable verbose overlay provider logging.
    pub debug: bool,

    /// Ask the overlay provider not to upload its logs.
    pub no_logs: bool,
}

impl NodeIdentity {
    /// Create an identity with the given name and state root.
    pub fn new(name: impl Into<String>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            control_url: None,
            state_dir: state_dir.into(),
            debug: false,
            no_logs: true,
        }
    }

    /// Per-identity state subdirectory: `<state_dir>/data-<sanitized-name>`.
    ///
    /// Distinct identity names map to distinct subdirectories, so several
    /// presence servers can share one state root without contention.
    #[must_use]
    pub fn state_subdir(&self) -> PathBuf {
        self.state_dir.join(format!("data-{}", sanitize_name(&self.name)))
    }
}

/// Replace everything but letters, digits, and hyphens with underscores.
///
/// Identity names like `tailmon/node-exporter/myhost` contain path
/// separators; this maps them to a filesystem- and hostname-safe form.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("tailmon/node-exporter/host1", "tailmon_node-exporter_host1")]
    #[test_case("simple-name", "simple-name")]
    #[test_case("with.dots and spaces", "with_dots_and_spaces")]
    #[test_case("", "")]
    fn sanitize_maps_unsafe_characters(input: &str, want: &str) {
        assert_eq!(sanitize_name(input), want);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize_name("tailmon/postgres-exporter/db.internal");
        assert_eq!(sanitize_name(&once), once);
    }

    #[test]
    fn sanitize_output_charset() {
        let out = sanitize_name("a!b@c#d$e%f^g&h*i(j)k/l\\m");
        assert!(out
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn state_subdir_uses_sanitized_name() {
        let identity = NodeIdentity::new("tailmon/node-exporter/host1", "/var/lib/tailmon");
        assert_eq!(
            identity.state_subdir(),
            PathBuf::from("/var/lib/tailmon/data-tailmon_node-exporter_host1")
        );
    }
}
