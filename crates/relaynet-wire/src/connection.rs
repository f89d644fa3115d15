//! A framed, peer-named TCP connection carrying typed envelopes.
//!
//! The stream is split into independent read and write halves, each behind
//! its own async mutex, so one task can block in [`Connection::receive`] while
//! another calls [`Connection::send`]. Same-direction calls from several tasks
//! are serialised by the mutex rather than interleaving frames.
//!
//! [`Connection::close`] flips a watch flag that every blocked send and
//! receive selects on, so closing never waits behind a stalled peer.

use crate::envelope::{decode_envelope, encode_message, write_frame, Envelope, FrameReader};
use crate::error::{WireError, WireResult};
use crate::message::Message;
use crate::peers::{PeerDirection, PeerMap};
use crate::registry::TypeRegistry;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Resolve once the flag behind `rx` is set.
pub(crate) async fn wait_flag(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|set| *set).await;
}

/// One live connection to a named peer.
pub struct Connection {
    id: u64,
    peer: String,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    reader: Mutex<Option<FrameReader<OwnedReadHalf>>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed: watch::Sender<bool>,
    registry: TypeRegistry,
    max_message_size: u32,
    peers: Option<PeerMap>,
}

impl Connection {
    /// Wrap an established stream.
    ///
    /// `peer_name` is reported by [`Connection::peer_name`] for the whole
    /// lifetime of the connection.
    pub fn from_stream(
        stream: TcpStream,
        peer_name: impl Into<String>,
        registry: TypeRegistry,
        max_message_size: u32,
    ) -> WireResult<Self> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let (closed, _) = watch::channel(false);

        Ok(Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            peer: peer_name.into(),
            local_addr,
            peer_addr,
            reader: Mutex::new(Some(FrameReader::new(reader, max_message_size))),
            writer: Mutex::new(Some(writer)),
            closed,
            registry,
            max_message_size,
            peers: None,
        })
    }

    /// Record this connection in a host's peer map; closing updates it.
    pub(crate) fn attach(mut self, peers: &PeerMap, direction: PeerDirection) -> Self {
        peers.record(&self.peer, self.id, self.peer_addr, direction);
        self.peers = Some(peers.clone());
        self
    }

    /// Process-unique id of this connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the remote endpoint.
    pub fn peer_name(&self) -> &str {
        &self.peer
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Encode `msg` and write it as one frame.
    pub async fn send<M: Message>(&self, msg: &M) -> WireResult<()> {
        self.send_dyn(msg).await
    }

    /// [`send`](Self::send) for an already type-erased message.
    ///
    /// A send still waiting on a slow peer when the connection is closed
    /// returns [`WireError::ConnectionClosed`]; the partially written frame
    /// is abandoned along with the write half.
    pub async fn send_dyn(&self, msg: &dyn Message) -> WireResult<()> {
        let mut closed_rx = self.closed.subscribe();
        if *closed_rx.borrow() {
            return Err(WireError::ConnectionClosed);
        }
        let body = encode_message(&self.registry, msg)?;

        let mut guard = tokio::select! {
            _ = wait_flag(&mut closed_rx) => return Err(WireError::ConnectionClosed),
            guard = self.writer.lock() => guard,
        };
        let writer = guard.as_mut().ok_or(WireError::ConnectionClosed)?;
        let written = tokio::select! {
            _ = wait_flag(&mut closed_rx) => None,
            written = write_frame(writer, &body, self.max_message_size) => Some(written),
        };
        match written {
            None => {
                guard.take();
                debug!(peer = %self.peer, "send abandoned by close");
                Err(WireError::ConnectionClosed)
            }
            Some(Ok(())) => {
                debug!(peer = %self.peer, bytes = body.len(), "sent envelope");
                Ok(())
            }
            Some(Err(WireError::Io(e))) => {
                guard.take();
                drop(guard);
                warn!(peer = %self.peer, error = %e, "write failed, closing connection");
                self.note_closed();
                Err(WireError::Io(e))
            }
            Some(Err(e)) => Err(e),
        }
    }

    /// Wait for the next envelope.
    ///
    /// Decode failures ([`WireError::is_recoverable_decode`]) leave the
    /// connection open; the offending frame has been consumed. Peer EOF,
    /// I/O errors and oversized frames close it.
    ///
    /// Cancel-safe: dropping the future (for example under
    /// `tokio::time::timeout`) keeps any partially received frame buffered
    /// for the next call.
    pub async fn receive(&self) -> WireResult<Envelope> {
        let mut closed_rx = self.closed.subscribe();
        if *closed_rx.borrow() {
            return Err(WireError::ConnectionClosed);
        }

        let mut guard = tokio::select! {
            _ = wait_flag(&mut closed_rx) => return Err(WireError::ConnectionClosed),
            guard = self.reader.lock() => guard,
        };
        let Some(reader) = guard.as_mut() else {
            return Err(WireError::ConnectionClosed);
        };

        let frame = tokio::select! {
            _ = wait_flag(&mut closed_rx) => None,
            frame = reader.next_frame() => Some(frame),
        };

        match frame {
            Some(Ok(body)) => {
                let env = decode_envelope(&self.registry, &body).map_err(|e| {
                    warn!(peer = %self.peer, error = %e, "dropping undecodable envelope");
                    e
                })?;
                debug!(
                    peer = %self.peer,
                    handle = env.handle().get(),
                    type_name = env.type_name(),
                    "received envelope"
                );
                Ok(env)
            }
            None => {
                guard.take();
                Err(WireError::ConnectionClosed)
            }
            Some(Err(e)) => {
                guard.take();
                drop(guard);
                if !matches!(e, WireError::ConnectionClosed) {
                    warn!(peer = %self.peer, error = %e, "read failed, closing connection");
                }
                self.note_closed();
                Err(e)
            }
        }
    }

    /// Close the connection and release the stream.
    ///
    /// Wakes any blocked [`receive`](Self::receive) or [`send`](Self::send),
    /// then shuts the write half if no send abandoned it mid-frame. Calling
    /// it again is a no-op.
    pub async fn close(&self) {
        self.note_closed();

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(peer = %self.peer, error = %e, "shutdown after close");
            }
        }
        self.reader.lock().await.take();
    }

    fn note_closed(&self) {
        if !self.closed.send_replace(true) {
            debug!(peer = %self.peer, conn_id = self.id, "connection closed");
            if let Some(peers) = &self.peers {
                peers.mark_closed(&self.peer, self.id);
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.note_closed();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{BinaryError, BinaryMessage};
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;

    const MAX: u32 = 1024 * 1024;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Vote {
        round: u32,
        accept: bool,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Commit {
        round: u32,
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Nonce(u64);

    impl BinaryMessage for Nonce {
        fn marshal_binary(&self) -> Result<Vec<u8>, BinaryError> {
            Ok(self.0.to_le_bytes().to_vec())
        }

        fn unmarshal_binary(&mut self, data: &[u8]) -> Result<(), BinaryError> {
            let bytes: [u8; 8] = data
                .try_into()
                .map_err(|_| BinaryError::new("nonce must be 8 bytes"))?;
            self.0 = u64::from_le_bytes(bytes);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Unregistered;

    fn registry() -> TypeRegistry {
        let registry = TypeRegistry::new();
        registry.register::<Vote>().unwrap();
        registry.register_binary::<Nonce>().unwrap();
        registry
    }

    async fn pair_with(client: TypeRegistry, server: TypeRegistry) -> (Connection, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (dialed, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (accepted, remote) = accepted.unwrap();

        let a = Connection::from_stream(dialed.unwrap(), addr.to_string(), client, MAX).unwrap();
        let b = Connection::from_stream(accepted, remote.to_string(), server, MAX).unwrap();
        (a, b)
    }

    async fn pair() -> (Connection, Connection) {
        let registry = registry();
        pair_with(registry.clone(), registry).await
    }

    #[tokio::test]
    async fn test_send_receive_both_paths() {
        let (a, b) = pair().await;

        a.send(&Vote {
            round: 3,
            accept: true,
        })
        .await
        .unwrap();
        a.send(&Nonce(0xfeed)).await.unwrap();

        let first = b.receive().await.unwrap();
        assert_eq!(
            first.downcast::<Vote>().unwrap(),
            Vote {
                round: 3,
                accept: true
            }
        );
        let second = b.receive().await.unwrap();
        assert_eq!(second.downcast_ref::<Nonce>(), Some(&Nonce(0xfeed)));
    }

    #[tokio::test]
    async fn test_peer_names() {
        let (a, b) = pair().await;
        assert_eq!(a.peer_name(), a.peer_addr().to_string());
        assert_eq!(b.peer_name(), a.local_addr().to_string());
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_unregistered_send_keeps_connection_open() {
        let (a, b) = pair().await;

        assert!(matches!(
            a.send(&Unregistered).await,
            Err(WireError::UnregisteredType(_))
        ));
        assert!(!a.is_closed());

        a.send(&Nonce(1)).await.unwrap();
        assert!(b.receive().await.unwrap().is::<Nonce>());
    }

    #[tokio::test]
    async fn test_unknown_type_is_recoverable() {
        let sender = registry();
        sender.register::<Commit>().unwrap();
        let (a, b) = pair_with(sender, registry()).await;

        a.send(&Commit { round: 9 }).await.unwrap();
        a.send(&Vote {
            round: 9,
            accept: false,
        })
        .await
        .unwrap();

        let err = b.receive().await.unwrap_err();
        assert!(matches!(err, WireError::UnknownType(3)));
        assert!(err.is_recoverable_decode());
        assert!(!b.is_closed());

        // The stream is still in sync.
        let env = b.receive().await.unwrap();
        assert_eq!(env.downcast_ref::<Vote>().map(|v| v.round), Some(9));
    }

    #[tokio::test]
    async fn test_close_unblocks_receive() {
        let (_a, b) = pair().await;
        let b = Arc::new(b);

        let waiter = {
            let b = Arc::clone(&b);
            tokio::spawn(async move { b.receive().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        b.close().await;

        let result = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("receive did not return after close")
            .unwrap();
        assert!(matches!(result, Err(WireError::ConnectionClosed)));
    }

    #[derive(Debug, Default)]
    struct Blob(Vec<u8>);

    impl BinaryMessage for Blob {
        fn marshal_binary(&self) -> Result<Vec<u8>, BinaryError> {
            Ok(self.0.clone())
        }

        fn unmarshal_binary(&mut self, data: &[u8]) -> Result<(), BinaryError> {
            self.0 = data.to_vec();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_close_unblocks_stalled_send() {
        const BIG: u32 = 32 * 1024 * 1024;
        let registry = TypeRegistry::new();
        registry.register_binary::<Blob>().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (dialed, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        // Accepted but never read, so the sender fills the socket buffers.
        let _silent = accepted.unwrap().0;
        let a = Arc::new(
            Connection::from_stream(dialed.unwrap(), addr.to_string(), registry, BIG).unwrap(),
        );

        let sender = {
            let a = Arc::clone(&a);
            tokio::spawn(async move { a.send(&Blob(vec![0u8; 24 * 1024 * 1024])).await })
        };
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!sender.is_finished());

        tokio::time::timeout(Duration::from_secs(2), a.close())
            .await
            .expect("close waited behind a stalled send");
        let result = tokio::time::timeout(Duration::from_secs(2), sender)
            .await
            .expect("send did not return after close")
            .unwrap();
        assert!(matches!(result, Err(WireError::ConnectionClosed)));
        assert!(a.is_closed());
    }

    #[tokio::test]
    async fn test_receive_is_cancel_safe() {
        let registry = registry();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (dialed, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let mut raw = dialed.unwrap();
        let b = Connection::from_stream(accepted.unwrap().0, "raw", registry.clone(), MAX).unwrap();

        let vote = Vote {
            round: 12,
            accept: true,
        };
        let body = encode_message(&registry, &vote).unwrap();
        let framed = crate::envelope::encode_frame(&body, MAX).unwrap();

        raw.write_all(&framed[..5]).await.unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(100), b.receive())
            .await
            .is_err());
        assert!(!b.is_closed());

        raw.write_all(&framed[5..]).await.unwrap();
        let env = b.receive().await.unwrap();
        assert_eq!(env.downcast::<Vote>().unwrap(), vote);
    }

    #[tokio::test]
    async fn test_operations_after_close() {
        let (a, _b) = pair().await;
        a.close().await;
        a.close().await;

        assert!(a.is_closed());
        assert!(matches!(
            a.send(&Nonce(1)).await,
            Err(WireError::ConnectionClosed)
        ));
        assert!(matches!(a.receive().await, Err(WireError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_peer_close_ends_receive() {
        let (a, b) = pair().await;
        a.close().await;

        assert!(matches!(b.receive().await, Err(WireError::ConnectionClosed)));
        assert!(b.is_closed());
    }

    #[tokio::test]
    async fn test_oversized_message_rejected_before_write() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (dialed, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let a = Connection::from_stream(dialed.unwrap(), "small", registry(), 4).unwrap();
        let b =
            Connection::from_stream(accepted.unwrap().0, "big", registry(), MAX).unwrap();

        assert!(matches!(
            a.send(&Vote {
                round: 1,
                accept: true
            })
            .await,
            Err(WireError::MessageTooLarge { max: 4, .. })
        ));
        assert!(!a.is_closed());

        // 2-byte handle + 8-byte nonce exceeds 4 as well; nothing was written.
        assert!(a.send(&Nonce(5)).await.is_err());
        a.close().await;
        assert!(matches!(b.receive().await, Err(WireError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_concurrent_send_and_receive() {
        let (a, b) = pair().await;
        let a = Arc::new(a);
        let b = Arc::new(b);

        let echo = {
            let b = Arc::clone(&b);
            tokio::spawn(async move {
                for _ in 0..20 {
                    let env = b.receive().await.unwrap();
                    let nonce = env.downcast::<Nonce>().unwrap();
                    b.send(&Nonce(nonce.0 * 2)).await.unwrap();
                }
            })
        };

        let reader = {
            let a = Arc::clone(&a);
            tokio::spawn(async move {
                let mut got = Vec::new();
                for _ in 0..20 {
                    got.push(a.receive().await.unwrap().downcast::<Nonce>().unwrap().0);
                }
                got
            })
        };

        for i in 0..20u64 {
            a.send(&Nonce(i)).await.unwrap();
        }

        echo.await.unwrap();
        let got = reader.await.unwrap();
        assert_eq!(got, (0..20u64).map(|i| i * 2).collect::<Vec<_>>());
    }
}
