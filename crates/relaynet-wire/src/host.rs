//! Network host: dials peers and accepts inbound connections.
//!
//! A [`Host`] bundles a name, a [`TypeRegistry`], dial policy and a
//! [`PeerMap`]. Outbound connections come from [`Host::open`]; inbound ones are
//! handed to a [`ConnectionHandler`] on their own task by the accept loop that
//! [`Host::listen`] starts.

use crate::connection::{wait_flag, Connection};
use crate::error::{WireError, WireResult};
use crate::peers::{PeerDirection, PeerMap};
use crate::registry::TypeRegistry;
use crate::retry::{retry_async, RetryConfig, RetryOutcome};
use crate::suite::Suite;

use async_trait::async_trait;
use relaynet_types::NetworkConfig;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Callback for accepted connections.
///
/// Each call runs on its own task and owns the connection; returning drops
/// (and closes) it.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    async fn handle(&self, conn: Connection);
}

/// Adapter returned by [`handler_fn`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ConnectionHandler for FnHandler<F>
where
    F: Fn(Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, conn: Connection) {
        (self.0)(conn).await
    }
}

/// Wrap an async closure as a [`ConnectionHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ConnectionHandler>
where
    F: Fn(Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// A named network endpoint.
pub struct Host {
    config: NetworkConfig,
    registry: TypeRegistry,
    peers: PeerMap,
    dial: RetryConfig,
}

impl Host {
    /// Create a host that shares the process-wide registry.
    pub fn new(config: NetworkConfig) -> Self {
        let registry = TypeRegistry::global().clone();
        if registry.suite() != Suite::from(config.suite) {
            warn!(
                host = %config.name,
                configured = ?config.suite,
                "global registry ignores the configured suite; use Host::with_registry"
            );
        }
        Self::with_registry(config, registry)
    }

    /// Create a host with its own registry.
    pub fn with_registry(config: NetworkConfig, registry: TypeRegistry) -> Self {
        let dial = RetryConfig::from(&config.dial);
        Self {
            config,
            registry,
            peers: PeerMap::new(),
            dial,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Connections this host has opened or accepted.
    pub fn peers(&self) -> &PeerMap {
        &self.peers
    }

    /// Dial `address`, retrying on failure.
    ///
    /// The returned connection reports `address` exactly as given from
    /// [`Connection::peer_name`]. A malformed address fails on the first
    /// attempt.
    pub async fn open(&self, address: &str) -> WireResult<Connection> {
        let host = self.name();
        let max_attempts = self.dial.max_attempts.max(1);
        debug!(host, peer = address, max_attempts, "dialing");

        let outcome = retry_async(
            &self.dial,
            |attempt| async move {
                TcpStream::connect(address).await.map_err(|e| {
                    warn!(
                        host,
                        peer = address,
                        attempt = attempt + 1,
                        max_attempts,
                        error = %e,
                        "connect failed"
                    );
                    e
                })
            },
            |e: &io::Error| e.kind() != io::ErrorKind::InvalidInput,
        )
        .await;

        match outcome {
            RetryOutcome::Success { result, attempts } => {
                let conn = Connection::from_stream(
                    result,
                    address,
                    self.registry.clone(),
                    self.config.max_message_size,
                )?
                .attach(&self.peers, PeerDirection::Outbound);
                info!(host, peer = address, conn_id = conn.id(), attempts, "connected");
                Ok(conn)
            }
            RetryOutcome::Exhausted {
                last_error,
                attempts,
            } => Err(WireError::DialFailed {
                address: address.to_string(),
                attempts,
                reason: last_error.to_string(),
            }),
        }
    }

    /// Bind `bind_address` and start accepting connections in the background.
    ///
    /// Every accepted connection is named after the remote socket address and
    /// passed to `handler` on a fresh task.
    pub async fn listen(
        &self,
        bind_address: &str,
        handler: Arc<dyn ConnectionHandler>,
    ) -> WireResult<Listener> {
        let listener = TcpListener::bind(bind_address)
            .await
            .map_err(|source| WireError::Bind {
                address: bind_address.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(host = %self.name(), %local_addr, "listening");

        let ctx = AcceptContext {
            host: self.config.name.clone(),
            registry: self.registry.clone(),
            peers: self.peers.clone(),
            max_message_size: self.config.max_message_size,
        };
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, ctx, handler, shutdown_rx));

        Ok(Listener {
            local_addr,
            shutdown,
            task,
        })
    }

    /// Listen on `bind_address` and accept until the accept loop stops.
    pub async fn serve(
        &self,
        bind_address: &str,
        handler: Arc<dyn ConnectionHandler>,
    ) -> WireResult<()> {
        let listener = self.listen(bind_address, handler).await?;
        listener.join().await;
        Ok(())
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.config.name)
            .field("shapes", &self.registry.len())
            .field("open_peers", &self.peers.open_count())
            .finish()
    }
}

/// Handle to a running accept loop.
///
/// Dropping it stops accepting, as does [`Listener::shutdown`].
pub struct Listener {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Listener {
    /// The bound address; useful after binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting. Connections already handed out are unaffected.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait for the accept loop to finish.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(local_addr = %self.local_addr, error = %e, "accept loop panicked");
        }
    }
}

struct AcceptContext {
    host: String,
    registry: TypeRegistry,
    peers: PeerMap,
    max_message_size: u32,
}

async fn accept_loop(
    listener: TcpListener,
    ctx: AcceptContext,
    handler: Arc<dyn ConnectionHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = wait_flag(&mut shutdown) => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, remote)) => {
                let peer = remote.to_string();
                let conn = match Connection::from_stream(
                    stream,
                    peer.as_str(),
                    ctx.registry.clone(),
                    ctx.max_message_size,
                ) {
                    Ok(conn) => conn.attach(&ctx.peers, PeerDirection::Inbound),
                    Err(e) => {
                        warn!(host = %ctx.host, %peer, error = %e, "dropping inbound connection");
                        continue;
                    }
                };
                debug!(host = %ctx.host, %peer, conn_id = conn.id(), "accepted connection");

                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    handler.handle(conn).await;
                });
            }
            Err(e) => {
                error!(host = %ctx.host, error = %e, "accept error");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
    info!(host = %ctx.host, "listener stopped");
}
