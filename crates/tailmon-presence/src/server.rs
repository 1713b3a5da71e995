//! The presence server: one overlay identity's lifecycle.
//!
//! `start` brings the identity up, waits for the overlay to assign it
//! an address, and binds the listener on that address alone. While the
//! wait is outstanding a background watcher polls the overlay's local
//! status and repeatedly logs the authentication URL, so an operator
//! tailing the logs always sees how to finish the join.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Level};

use tailmon_overlay::{OverlayConfig, OverlayStatus, TailscaledOverlay};

use crate::error::{PresenceError, Result};
use crate::identity::NodeIdentity;

/// Port every presence server listens on.
const OVERLAY_PORT: u16 = 80;

/// Interval between authentication status polls.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Deadline for draining in-flight requests on shutdown.
const DRAIN_DEADLINE: Duration = Duration::from_secs(1);

/// Captured on a successful `start`; the only path that releases the
/// listener, the HTTP server, and the overlay handle.
struct ShutdownHandle {
    stop_tx: watch::Sender<bool>,
    served: JoinHandle<()>,
    overlay: Arc<TailscaledOverlay>,
}

/// Manages one overlay identity: initialization, authentication watch,
/// HTTP serving, and teardown.
pub struct PresenceServer {
    identity: NodeIdentity,
    overlay: OnceCell<Arc<TailscaledOverlay>>,
    shutdown: Mutex<Option<ShutdownHandle>>,
}

impl PresenceServer {
    /// Create a presence server for the given identity. Nothing is
    /// initialized until `acquire_handle` or `start` is called.
    #[must_use]
    pub fn new(identity: NodeIdentity) -> Self {
        Self {
            identity,
            overlay: OnceCell::new(),
            shutdown: Mutex::new(None),
        }
    }

    /// The identity this server manages.
    #[must_use]
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Initialize once: create the state subdirectory and construct the
    /// overlay handle. Repeated calls return the same handle.
    async fn init(&self) -> Result<&Arc<TailscaledOverlay>> {
        self.overlay
            .get_or_try_init(|| async {
                debug!(name = %self.identity.name, "presence init");

                let dir = self.identity.state_subdir();
                create_state_dir(&dir).map_err(|source| PresenceError::StateDir {
                    path: dir.clone(),
                    source,
                })?;

                // Overlay daemon output is noisy; only surface it when the
                // operator asked for debug or the log filter already
                // permits it.
                let verbose = self.identity.debug || tracing::enabled!(Level::DEBUG);

                Ok(Arc::new(TailscaledOverlay::new(OverlayConfig {
                    hostname: self.identity.name.clone(),
                    control_url: self.identity.control_url.clone(),
                    state_dir: dir,
                    verbose,
                    no_logs: self.identity.no_logs,
                })))
            })
            .await
    }

    /// Initialize if needed and return the overlay handle.
    ///
    /// Useful when the request handler itself needs overlay facilities
    /// (the discovery handler queries the peer list) and must be built
    /// before `start`.
    ///
    /// # Errors
    ///
    /// Returns error if state-directory creation fails.
    pub async fn acquire_handle(&self) -> Result<Arc<TailscaledOverlay>> {
        Ok(Arc::clone(self.init().await?))
    }

    /// Bring the overlay up and start serving HTTP on port 80.
    ///
    /// Spawns the authentication watcher, then blocks until the overlay
    /// has assigned this identity an address. On first run that means
    /// until authentication completes; the watcher logs the URL the
    /// whole time. The listener binds only the assigned address, so
    /// identities on the same host never contend for the port.
    ///
    /// # Errors
    ///
    /// Returns error if initialization, overlay connect, or the listener
    /// bind fails.
    pub async fn start<H, F>(&self, handler: H) -> Result<()>
    where
        H: Fn(Request<Incoming>) -> F + Clone + Send + Sync + 'static,
        F: Future<Output = Response<Full<Bytes>>> + Send + 'static,
    {
        let overlay = Arc::clone(self.init().await?);

        info!(name = %self.identity.name, "overlay starting");
        overlay.connect().await?;

        let (stop_tx, stop_rx) = watch::channel(false);

        tokio::spawn(watch_auth(Arc::clone(&overlay), stop_rx.clone()));

        debug!(port = OVERLAY_PORT, "listen");
        let listener = overlay.listen(OVERLAY_PORT).await?;

        let served = tokio::spawn(serve(listener, handler, stop_rx));

        *self.shutdown.lock().await = Some(ShutdownHandle {
            stop_tx,
            served,
            overlay,
        });

        Ok(())
    }

    /// Tear the session down: drain HTTP with a one-second deadline, stop
    /// the watcher, and close the overlay handle.
    ///
    /// A no-op unless `start` succeeded; safe to call more than once.
    pub async fn shutdown(&self) {
        let handle = self.shutdown.lock().await.take();
        let Some(handle) = handle else { return };

        let _ = handle.stop_tx.send(true);
        if handle.served.await.is_err() {
            warn!("serve task panicked during shutdown");
        }
        handle.overlay.close().await;
        info!(name = %self.identity.name, "shutdown");
    }
}

/// Create the per-identity state directory with restrictive permissions.
/// Pre-existing directories are fine; the overlay owns the contents.
fn create_state_dir(dir: &std::path::Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

/// Poll the overlay's local status until the backend reports `Running`,
/// logging the authentication URL at error severity on every poll while
/// one is outstanding. Deliberately repetitive: overlay join requires
/// out-of-band authentication on first run, and the operator should not
/// have to guess where to go.
///
/// Exits when the backend is running or the stop signal fires.
pub(crate) async fn watch_auth<S>(overlay: Arc<S>, mut stop: watch::Receiver<bool>)
where
    S: OverlayStatus + Send + Sync + 'static,
{
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = match overlay.local_status().await {
                    Ok(status) => status,
                    Err(e) => {
                        // Transient local-query failures are not fatal;
                        // keep polling.
                        error!(error = %e, "status query failed");
                        continue;
                    }
                };

                debug!(
                    backend_state = %status.backend_state,
                    auth_url = %status.auth_url,
                    health = ?status.health,
                    "status"
                );

                if status.is_running() {
                    let (id, dns, ips) = status
                        .self_node
                        .map(|s| (s.id, s.dns_name, s.tailscale_ips))
                        .unwrap_or_default();
                    info!(id = %id, dns = %dns, ips = ?ips, "overlay running");
                    return;
                }

                if !status.auth_url.is_empty() {
                    error!(url = %status.auth_url, "needs authentication");
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    debug!("auth watcher stopped");
                    return;
                }
            }
        }
    }
}

/// Accept loop: serve connections until the stop signal fires or the
/// listener fails, then drain in-flight requests within the deadline.
async fn serve<H, F>(listener: TcpListener, handler: H, mut stop: watch::Receiver<bool>)
where
    H: Fn(Request<Incoming>) -> F + Clone + Send + Sync + 'static,
    F: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    let graceful = GracefulShutdown::new();
    debug!(port = OVERLAY_PORT, "serving");

    loop {
        tokio::select! {
            accept = listener.accept() => {
                match accept {
                    Ok((stream, peer_addr)) => {
                        let io = TokioIo::new(stream);
                        let handler = handler.clone();
                        let svc = service_fn(move |req| {
                            let handler = handler.clone();
                            async move { Ok::<_, Infallible>(handler(req).await) }
                        });
                        let conn = http1::Builder::new().serve_connection(io, svc);
                        let conn = graceful.watch(conn);
                        tokio::spawn(async move {
                            if let Err(e) = conn.await {
                                // Connection reset / closed by client is normal
                                debug!(peer = %peer_addr, error = %e, "connection error");
                            }
                        });
                    }
                    Err(e) => {
                        // The accept loop cannot recover; the node stops
                        // serving until restarted.
                        error!(error = %e, "accept failed");
                        break;
                    }
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    info!("shutting down");
                    break;
                }
            }
        }
    }

    drop(listener);
    if tokio::time::timeout(DRAIN_DEADLINE, graceful.shutdown())
        .await
        .is_err()
    {
        warn!("drain deadline exceeded, closing remaining connections");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tailmon_overlay::Status;

    /// Status source that reports `NeedsLogin` a fixed number of times
    /// before switching to `Running`.
    struct FakeStatus {
        calls: AtomicUsize,
        running_after: usize,
    }

    impl OverlayStatus for FakeStatus {
        async fn local_status(&self) -> tailmon_overlay::Result<Status> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let state = if n >= self.running_after {
                "Running"
            } else {
                "NeedsLogin"
            };
            Ok(serde_json::from_value(serde_json::json!({
                "BackendState": state,
                "AuthURL": if n >= self.running_after { "" } else { "https://login.example/a/xyz" },
                "Self": {
                    "ID": "1",
                    "DNSName": "node.example.ts.net.",
                    "TailscaleIPs": ["100.64.0.9"]
                }
            }))
            .expect("valid status json"))
        }

        async fn full_status(&self) -> tailmon_overlay::Result<Status> {
            self.local_status().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn auth_watcher_exits_once_running() {
        let fake = Arc::new(FakeStatus {
            calls: AtomicUsize::new(0),
            running_after: 3,
        });
        let (_tx, rx) = watch::channel(false);
        let watcher = tokio::spawn(watch_auth(Arc::clone(&fake), rx));

        tokio::time::advance(Duration::from_secs(10)).await;
        watcher.await.expect("watcher completes");

        // Three non-running polls plus the terminal one.
        assert_eq!(fake.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_watcher_honors_stop_signal() {
        let fake = Arc::new(FakeStatus {
            calls: AtomicUsize::new(0),
            running_after: usize::MAX,
        });
        let (tx, rx) = watch::channel(false);
        let watcher = tokio::spawn(watch_auth(Arc::clone(&fake), rx));

        tokio::time::advance(Duration::from_secs(3)).await;
        tx.send(true).expect("send stop");
        watcher.await.expect("watcher completes");
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let identity = NodeIdentity::new("tailmon/node-exporter/host1", tmp.path());
        let server = PresenceServer::new(identity);

        let first = server.acquire_handle().await.expect("first init");
        let second = server.acquire_handle().await.expect("second init");
        assert!(Arc::ptr_eq(&first, &second));

        let subdir = tmp.path().join("data-tailmon_node-exporter_host1");
        assert!(subdir.is_dir());
    }

    #[tokio::test]
    async fn init_tolerates_existing_state_dir() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let identity = NodeIdentity::new("exporter", tmp.path());
        std::fs::create_dir_all(tmp.path().join("data-exporter")).expect("pre-create");

        let server = PresenceServer::new(identity);
        assert!(server.acquire_handle().await.is_ok());
    }

    #[tokio::test]
    async fn shutdown_before_start_is_noop() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let server = PresenceServer::new(NodeIdentity::new("exporter", tmp.path()));
        // No session captured yet; must return without effect.
        server.shutdown().await;
        server.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_after_failed_start_is_noop() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("state");
        std::fs::write(&root, b"not a directory").expect("write file");

        let server = PresenceServer::new(NodeIdentity::new("exporter", &root));
        let started = server
            .start(|_req| async { Response::new(Full::new(Bytes::new())) })
            .await;
        assert!(started.is_err());

        // A failed start must leave nothing to tear down.
        server.shutdown().await;
    }
}
