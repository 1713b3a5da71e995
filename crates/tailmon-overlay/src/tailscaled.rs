//! Per-identity overlay daemon management.
//!
//! Each node identity gets its own `tailscaled` instance with a private
//! state directory and control socket, so several identities can coexist
//! in one process. Control operations go through the `tailscale` CLI
//! pointed at that socket.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{OverlayError, Result};
use crate::status::{OverlayStatus, Status};

const TAILSCALED_BIN: &str = "tailscaled";
const TAILSCALE_BIN: &str = "tailscale";
const SOCKET_NAME: &str = "tailscaled.sock";

/// Interval between address polls while the identity joins.
const ADDR_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for one overlay node identity.
#[derive(Debug, Clone, Default)]
pub struct OverlayConfig {
    /// Hostname to register on the overlay.
    pub hostname: String,

    /// Custom control server URL. Empty/None uses the default.
    pub control_url: Option<String>,

    /// Directory holding this identity's key material and cached state.
    pub state_dir: PathBuf,

    /// Forward daemon output to the log stream at debug level.
    pub verbose: bool,

    /// Ask the daemon not to upload logs (no-logs-no-support).
    pub no_logs: bool,
}

/// An overlay node handle backed by a dedicated `tailscaled`.
///
/// Constructing does not connect; call [`connect`](Self::connect) to spawn
/// the daemon and begin the join. Authentication may still be outstanding
/// afterwards; observe progress through [`OverlayStatus`] queries.
pub struct TailscaledOverlay {
    config: OverlayConfig,
    socket_path: PathBuf,
    daemon: Mutex<Option<Child>>,
}

impl TailscaledOverlay {
    /// Create a handle for the given identity. Does not connect.
    #[must_use]
    pub fn new(config: OverlayConfig) -> Self {
        let socket_path = config.state_dir.join(SOCKET_NAME);
        Self {
            config,
            socket_path,
            daemon: Mutex::new(None),
        }
    }

    /// The hostname this identity registers on the overlay.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.config.hostname
    }

    /// Path to this identity's control socket.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Spawn the daemon and begin joining the overlay.
    ///
    /// Returns once the daemon is launched and the join has been
    /// requested. The join itself completes asynchronously; first-run
    /// setups require out-of-band authentication, surfaced through the
    /// `AuthURL` field of [`local_status`](Self::local_status).
    ///
    /// # Errors
    ///
    /// Returns error if the daemon binary cannot be spawned.
    pub async fn connect(&self) -> Result<()> {
        let mut cmd = Command::new(TAILSCALED_BIN);
        cmd.arg("--statedir")
            .arg(&self.config.state_dir)
            .arg("--socket")
            .arg(&self.socket_path)
            .stdin(Stdio::null())
            // The daemon must not outlive the process, even when startup
            // aborts before a clean close.
            .kill_on_drop(true);

        if self.config.no_logs {
            cmd.env("TS_NO_LOGS_NO_SUPPORT", "1");
        }

        if self.config.verbose {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let mut child = cmd.spawn().map_err(|e| OverlayError::NotInstalled {
            program: TAILSCALED_BIN,
            message: e.to_string(),
        })?;

        if self.config.verbose {
            if let Some(stdout) = child.stdout.take() {
                forward_output(stdout, self.config.hostname.clone());
            }
            if let Some(stderr) = child.stderr.take() {
                forward_output(stderr, self.config.hostname.clone());
            }
        }

        *self.daemon.lock().await = Some(child);
        debug!(hostname = %self.config.hostname, "overlay daemon spawned");

        // `up` blocks until authentication completes, which can take
        // arbitrarily long on first run. Run it detached; the auth watcher
        // reports progress from status polls.
        let mut up = self.cli_command();
        up.arg("up").arg("--hostname").arg(&self.config.hostname);
        if let Some(url) = self.config.control_url.as_deref() {
            if !url.is_empty() {
                up.arg("--login-server").arg(url);
            }
        }
        let hostname = self.config.hostname.clone();
        tokio::spawn(async move {
            match up.output().await {
                Ok(out) if out.status.success() => {
                    debug!(hostname = %hostname, "overlay join requested");
                }
                Ok(out) => {
                    warn!(
                        hostname = %hostname,
                        stderr = %String::from_utf8_lossy(&out.stderr),
                        "overlay up exited with error"
                    );
                }
                Err(e) => {
                    warn!(hostname = %hostname, error = %e, "unable to run overlay up");
                }
            }
        });

        Ok(())
    }

    /// Open a TCP listener for overlay traffic on the given port.
    ///
    /// Binds the node's first assigned overlay address, waiting for the
    /// daemon to assign one if it has not yet. Each identity's daemon
    /// hands out a distinct address, so several identities can all hold
    /// the same port on one host, and the handler is never reachable
    /// outside the overlay. On first run the address appears only after
    /// out-of-band authentication completes.
    ///
    /// # Errors
    ///
    /// Returns error if the bind fails (e.g., the port is already in use).
    pub async fn listen(&self, port: u16) -> Result<TcpListener> {
        let ip = wait_for_addr(self, ADDR_POLL_INTERVAL).await;
        let addr = SocketAddr::new(ip, port);

        TcpListener::bind(addr)
            .await
            .map_err(|source| OverlayError::Bind { addr, source })
    }

    /// Leave the overlay and stop the daemon.
    pub async fn close(&self) {
        let mut down = self.cli_command();
        down.arg("down");
        match down.output().await {
            Ok(out) if !out.status.success() => {
                warn!(
                    stderr = %String::from_utf8_lossy(&out.stderr),
                    "overlay down warning"
                );
            }
            Err(e) => warn!(error = %e, "unable to run overlay down"),
            Ok(_) => {}
        }

        if let Some(mut child) = self.daemon.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "unable to stop overlay daemon");
            }
            info!(hostname = %self.config.hostname, "overlay daemon stopped");
        }
    }

    fn cli_command(&self) -> Command {
        let mut cmd = Command::new(TAILSCALE_BIN);
        cmd.arg("--socket")
            .arg(&self.socket_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    async fn query_status(&self, with_peers: bool) -> Result<Status> {
        let mut cmd = self.cli_command();
        cmd.arg("status").arg("--json");
        if !with_peers {
            cmd.arg("--peers=false");
        }

        let output = cmd.output().await.map_err(|e| OverlayError::NotInstalled {
            program: TAILSCALE_BIN,
            message: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(OverlayError::CommandFailed {
                command: "tailscale status".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| OverlayError::StatusParse {
            message: e.to_string(),
        })
    }
}

impl OverlayStatus for TailscaledOverlay {
    async fn local_status(&self) -> Result<Status> {
        self.query_status(false).await
    }

    async fn full_status(&self) -> Result<Status> {
        self.query_status(true).await
    }
}

/// Poll until the node has an overlay address assigned, then return it.
///
/// Listeners are scoped to the identity's own address, never anything
/// broader: the unspecified address would collide across identities
/// sharing one host and expose the handler on every interface.
pub(crate) async fn wait_for_addr<S>(src: &S, interval: Duration) -> IpAddr
where
    S: OverlayStatus + Sync,
{
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match src.local_status().await {
            Ok(status) => {
                if let Some(ip) = status
                    .self_node
                    .and_then(|s| s.tailscale_ips.first().copied())
                {
                    return ip;
                }
                debug!("waiting for overlay address");
            }
            Err(e) => {
                debug!(error = %e, "status unavailable while waiting for address");
            }
        }
    }
}

/// Forward daemon output lines to the log stream at debug level.
fn forward_output<R>(reader: R, hostname: String)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "tailscaled", hostname = %hostname, "{line}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::SelfStatus;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports no assigned address until a fixed number of polls elapse.
    struct FakeStatus {
        calls: AtomicUsize,
        assign_after: usize,
    }

    impl OverlayStatus for FakeStatus {
        async fn local_status(&self) -> Result<Status> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let ips: Vec<IpAddr> = if n >= self.assign_after {
                vec!["100.64.0.9".parse().expect("ip")]
            } else {
                Vec::new()
            };
            Ok(Status {
                backend_state: if ips.is_empty() { "NeedsLogin" } else { "Running" }.to_string(),
                auth_url: String::new(),
                health: Vec::new(),
                self_node: Some(SelfStatus {
                    id: "1".to_string(),
                    host_name: String::new(),
                    dns_name: "node.example.ts.net.".to_string(),
                    tailscale_ips: ips,
                }),
                peer: HashMap::new(),
            })
        }

        async fn full_status(&self) -> Result<Status> {
            self.local_status().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_addr_returns_the_assigned_address() {
        let fake = FakeStatus {
            calls: AtomicUsize::new(0),
            assign_after: 3,
        };

        let ip = wait_for_addr(&fake, Duration::from_secs(1)).await;
        assert_eq!(ip, "100.64.0.9".parse::<IpAddr>().expect("ip"));
        assert!(!ip.is_unspecified());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_addr_never_falls_back_before_assignment() {
        // Two identities polling pre-auth must never receive a shared
        // bind target; the wait simply continues until an address exists.
        let fake = FakeStatus {
            calls: AtomicUsize::new(0),
            assign_after: usize::MAX,
        };

        let waited =
            tokio::time::timeout(Duration::from_secs(60), wait_for_addr(&fake, Duration::from_secs(1)))
                .await;
        assert!(waited.is_err(), "must keep waiting until an address is assigned");
    }

    #[test]
    fn socket_path_lives_in_state_dir() {
        let overlay = TailscaledOverlay::new(OverlayConfig {
            hostname: "tailmon/node-exporter/host".into(),
            state_dir: PathBuf::from("/var/lib/tailmon/data-x"),
            ..Default::default()
        });
        assert_eq!(
            overlay.socket_path(),
            Path::new("/var/lib/tailmon/data-x/tailscaled.sock")
        );
        assert_eq!(overlay.hostname(), "tailmon/node-exporter/host");
    }

    #[test]
    fn default_config_is_quiet() {
        let config = OverlayConfig::default();
        assert!(!config.verbose);
        assert!(!config.no_logs);
        assert!(config.control_url.is_none());
    }
}
