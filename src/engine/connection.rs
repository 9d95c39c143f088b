//! Engine connection: handshake, upgrade, keepalive and framing.
//!
//! A [`Connection`] owns one established transport and, while upgrading, a
//! candidate. It exposes a reliable ordered message channel to the layer
//! above through [`Connection::next_reader`] and [`Connection::next_writer`].
//!
//! # Background Tasks
//!
//! [`Connection::open`] spawns two tokio tasks:
//!
//! - **Read loop**: reads frames from the candidate (if any) or the current
//!   transport, answers pings, drives the upgrade and hands message frames to
//!   the consumer one at a time.
//! - **Keepalive loop**: sends pings every `ping_interval` and closes the
//!   connection if nothing proves liveness within `ping_timeout`.
//!
//! # Write Path
//!
//! All writes (application messages, pings, pongs, upgrade and close frames)
//! go through one connection-wide write lock so frames never interleave.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, mpsc, watch};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::transport::{
    Frame, FrameKind, MessageType, Transport, TransportFactories, TransportKind, TransportRequest,
};

use super::handoff::{self, ConnReader, Handoff, HandoffReceiver};
use super::handshake::HandshakeData;
use super::state::{ConnectionState, Slots, TransportSlot};

// ============================================================================
// Constants
// ============================================================================

/// Ping interval used when the handshake does not provide one.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(25_000);

/// Ping timeout used when the handshake does not provide one.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_millis(60_000);

/// How long a writer waits for an in-flight upgrade to settle (30 × 50ms).
const UPGRADE_WRITE_WAIT: Duration = Duration::from_millis(1_500);

/// Upper bound on the graceful close-frame write.
const CLOSE_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// ConnectOptions
// ============================================================================

/// Parameters for [`Connection::open`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Endpoint URL, path and static query included.
    pub url: Url,
    /// Preferred transport. `Stream` means "handshake over polling, then upgrade".
    pub transport: TransportKind,
    /// Headers forwarded with every transport request.
    pub headers: Vec<(String, String)>,
    /// Factories for every transport the session may use.
    pub factories: TransportFactories,
    /// Fallback ping interval.
    pub ping_interval: Duration,
    /// Fallback ping timeout.
    pub ping_timeout: Duration,
}

impl ConnectOptions {
    /// Creates options with default keepalive fallbacks and no headers.
    #[must_use]
    pub fn new(url: Url, transport: TransportKind, factories: TransportFactories) -> Self {
        Self {
            url,
            transport,
            headers: Vec::new(),
            factories,
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
        }
    }

    fn request(&self, kind: TransportKind, session_id: Option<&SessionId>) -> TransportRequest {
        TransportRequest::new(&self.url, kind, session_id.cloned(), self.headers.clone())
    }
}

// ============================================================================
// Liveness
// ============================================================================

/// Signals from the read loop to the keepalive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Liveness {
    /// A pong arrived: resets both the ping schedule and the timeout clock.
    ObservedPong,
    /// The peer pinged us and we answered: resets the timeout clock only.
    AnsweredPing,
}

// ============================================================================
// Connection
// ============================================================================

/// One logical session over an upgradable transport.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and is shared as `Arc<Connection>`.
pub struct Connection {
    /// Session id from the handshake.
    session_id: SessionId,
    /// Upgrades advertised by the server.
    upgrades: Vec<String>,
    /// Negotiated ping interval.
    ping_interval: Duration,
    /// Negotiated ping timeout.
    ping_timeout: Duration,
    /// State and transport slots.
    slots: Slots,
    /// Serializes every frame write.
    write_lock: Arc<Mutex<()>>,
    /// Consumer side of the inbound hand-off.
    inbound: HandoffReceiver,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("session_id", &self.session_id)
            .field("ping_interval", &self.ping_interval)
            .field("ping_timeout", &self.ping_timeout)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Connection - Handshake
// ============================================================================

impl Connection {
    /// Performs the handshake and starts the background tasks.
    ///
    /// 1. Opens a polling request without session id and reads the
    ///    handshake payload, then closes that probe request.
    /// 2. Opens a polling request carrying the session id, discarding its
    ///    first frame. This becomes the current transport.
    /// 3. If the preference is `Stream`, opens the candidate, sends the probe
    ///    ping on it and enters `Upgrading`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedTransport`] if a needed factory is missing
    ///   (checked before any request is made)
    /// - [`Error::HandshakeFailed`] wrapping the error of the failing step
    pub async fn open(options: ConnectOptions) -> Result<Arc<Self>> {
        let polling = Arc::clone(options.factories.get(TransportKind::Polling)?);
        if options.transport == TransportKind::Stream {
            options.factories.get(TransportKind::Stream)?;
        }

        // Step 1: handshake probe
        let request = options.request(TransportKind::Polling, None);
        debug!(url = %request.url, "opening handshake request");
        let probe = polling
            .open(&request)
            .await
            .map_err(|e| Error::handshake("open", e))?;
        let frame = probe
            .next_frame()
            .await
            .map_err(|e| Error::handshake("open", e))?;
        let handshake = HandshakeData::from_frame(&frame).map_err(|e| Error::handshake("decode", e))?;
        if let Err(e) = probe.close().await {
            debug!(error = %e, "failed to close handshake probe");
        }

        let ping_interval = handshake.ping_interval().unwrap_or(options.ping_interval);
        let ping_timeout = handshake.ping_timeout().unwrap_or(options.ping_timeout);

        info!(
            sid = %handshake.sid,
            ping_interval_ms = ping_interval.as_millis() as u64,
            ping_timeout_ms = ping_timeout.as_millis() as u64,
            "handshake completed"
        );

        // Step 2: confirm the session
        let request = options.request(TransportKind::Polling, Some(&handshake.sid));
        let confirmed = polling
            .open(&request)
            .await
            .map_err(|e| Error::handshake("confirm", e))?;
        let slots = Slots::new();
        slots.establish(TransportSlot::new(Arc::clone(&confirmed)));

        match confirmed.next_frame().await {
            Ok(discarded) => trace!(kind = %discarded.kind, "confirmation frame discarded"),
            Err(e) => {
                Self::abandon(&slots).await;
                return Err(Error::handshake("confirm", e));
            }
        }

        // Step 3: optional upgrade
        if options.transport == TransportKind::Stream
            && let Err(e) = Self::start_upgrade(&options, &handshake, &slots).await
        {
            Self::abandon(&slots).await;
            return Err(e);
        }

        let (handoff, inbound) = handoff::channel();
        let (liveness_tx, liveness_rx) = mpsc::unbounded_channel();

        let connection = Arc::new(Self {
            session_id: handshake.sid,
            upgrades: handshake.upgrades,
            ping_interval,
            ping_timeout,
            slots,
            write_lock: Arc::new(Mutex::new(())),
            inbound,
        });

        tokio::spawn(Arc::clone(&connection).run_read_loop(handoff, liveness_tx));
        tokio::spawn(Arc::clone(&connection).run_keepalive(liveness_rx));

        Ok(connection)
    }

    /// Opens the candidate and sends the probe ping on it.
    async fn start_upgrade(
        options: &ConnectOptions,
        handshake: &HandshakeData,
        slots: &Slots,
    ) -> Result<()> {
        if !handshake.advertises(TransportKind::Stream) {
            warn!(upgrades = ?handshake.upgrades, "server does not advertise a stream upgrade");
        }

        let factory = options.factories.get(TransportKind::Stream)?;
        let request = options.request(TransportKind::Stream, Some(&handshake.sid));
        let candidate = factory
            .open(&request)
            .await
            .map_err(|e| Error::handshake("upgrade", e))?;

        if let Err(e) = candidate.send_frame(Frame::probe()).await {
            let _ = candidate.close().await;
            return Err(Error::handshake("probe", e));
        }

        slots.begin_upgrade(TransportSlot::new(candidate))
    }

    /// Closes every transport of a connection that failed to open.
    async fn abandon(slots: &Slots) {
        for slot in slots.mark_closed() {
            if let Err(e) = slot.handle.close().await {
                debug!(error = %e, transport = %slot.kind, "failed to close transport");
            }
        }
    }
}

// ============================================================================
// Connection - Public API
// ============================================================================

impl Connection {
    /// Returns the session id.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Returns the upgrades advertised by the server.
    #[inline]
    #[must_use]
    pub fn upgrades(&self) -> &[String] {
        &self.upgrades
    }

    /// Returns the negotiated ping interval.
    #[inline]
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    /// Returns the negotiated ping timeout.
    #[inline]
    #[must_use]
    pub fn ping_timeout(&self) -> Duration {
        self.ping_timeout
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.slots.state()
    }

    /// Subscribes to state changes.
    #[inline]
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.slots.subscribe()
    }

    /// Returns which transport currently carries writes.
    #[must_use]
    pub fn transport(&self) -> Option<TransportKind> {
        self.slots.current().map(|transport| transport.kind())
    }

    /// Waits for the next inbound message.
    ///
    /// The read loop stays blocked until the returned reader is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EndOfStream`] once the connection is closed.
    pub async fn next_reader(&self) -> Result<ConnReader> {
        if self.state() == ConnectionState::Closed {
            return Err(Error::EndOfStream);
        }
        self.inbound.take().await
    }

    /// Acquires the write lock and returns a writer for one message frame.
    ///
    /// While upgrading, waits up to 1.5s for the upgrade to settle before
    /// taking the lock.
    ///
    /// # Errors
    ///
    /// - [`Error::TransportUnavailable`] if the connection is not open or the
    ///   upgrade did not settle in time
    /// - [`Error::EndOfStream`] if the connection closed while waiting for the
    ///   upgrade or the write lock
    pub async fn next_writer(&self, message_type: MessageType) -> Result<ConnWriter> {
        self.wait_writable().await?;

        let guard = Arc::clone(&self.write_lock).lock_owned().await;
        if !self.state().is_open() {
            return Err(Error::EndOfStream);
        }
        let transport = self.slots.current().ok_or(Error::EndOfStream)?;

        Ok(ConnWriter {
            transport,
            message_type,
            buffer: Vec::new(),
            _guard: guard,
        })
    }

    /// Writes one message frame.
    ///
    /// # Errors
    ///
    /// Same as [`next_writer`](Self::next_writer), plus transport write errors.
    pub async fn send_message(&self, message_type: MessageType, data: &[u8]) -> Result<()> {
        let mut writer = self.next_writer(message_type).await?;
        writer.buffer.extend_from_slice(data);
        writer.close().await
    }

    /// Closes the connection.
    ///
    /// Sends a close frame (best effort, bounded) and closes the transports.
    /// A no-op if the connection is already closing or closed.
    ///
    /// # Errors
    ///
    /// Returns the error of closing the current transport.
    pub async fn close(&self) -> Result<()> {
        let Some((current, candidate)) = self.slots.begin_close() else {
            return Ok(());
        };
        debug!(sid = %self.session_id, "closing connection");

        if let Some(candidate) = candidate
            && let Err(e) = candidate.handle.close().await
        {
            debug!(error = %e, "failed to close candidate transport");
        }

        let Some(current) = current else {
            return Ok(());
        };

        let graceful = timeout(CLOSE_WRITE_TIMEOUT, async {
            let _guard = self.write_lock.lock().await;
            current.handle.send_frame(Frame::empty(FrameKind::Close)).await
        })
        .await;
        match graceful {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "close frame not delivered"),
            Err(_) => debug!("close frame timed out"),
        }

        current.handle.close().await
    }

    /// Waits until a write may proceed.
    async fn wait_writable(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Normal => Ok(()),
            ConnectionState::Upgrading => {
                let mut changes = self.slots.subscribe();
                let settled = timeout(
                    UPGRADE_WRITE_WAIT,
                    changes.wait_for(|state| *state != ConnectionState::Upgrading),
                )
                .await;

                match settled {
                    Err(_) => Err(Error::transport_unavailable("upgrade did not settle")),
                    Ok(Err(_)) => Err(Error::EndOfStream),
                    Ok(Ok(state)) if state.is_open() => Ok(()),
                    Ok(Ok(_)) => Err(Error::EndOfStream),
                }
            }
            state => Err(Error::transport_unavailable(format!("connection {state}"))),
        }
    }

    /// Writes a control frame on `transport` under the write lock.
    async fn write_control(&self, transport: &Arc<dyn Transport>, frame: Frame) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        transport.send_frame(frame).await
    }
}

// ============================================================================
// Connection - Read Loop
// ============================================================================

impl Connection {
    async fn run_read_loop(
        self: Arc<Self>,
        handoff: Handoff,
        liveness: mpsc::UnboundedSender<Liveness>,
    ) {
        while let Some((transport, from_candidate)) = self.slots.reader() {
            let frame = match transport.next_frame().await {
                Ok(frame) => frame,
                Err(e) if from_candidate => {
                    debug!(error = %e, "candidate transport failed");
                    if let Some(slot) = self.slots.abort_upgrade(&transport) {
                        let _ = slot.handle.close().await;
                    }
                    continue;
                }
                Err(e) => {
                    debug!(error = %e, "read loop terminated");
                    break;
                }
            };

            trace!(kind = %frame.kind, candidate = from_candidate, "frame received");

            if self
                .on_frame(&transport, frame, &handoff, &liveness)
                .await
                .is_break()
            {
                break;
            }
        }

        Self::abandon(&self.slots).await;
        drop(handoff);
        drop(liveness);
        debug!(sid = %self.session_id, "connection closed");
    }

    /// Routes one frame by kind.
    async fn on_frame(
        &self,
        transport: &Arc<dyn Transport>,
        frame: Frame,
        handoff: &Handoff,
        liveness: &mpsc::UnboundedSender<Liveness>,
    ) -> ControlFlow<()> {
        match frame.kind {
            FrameKind::Open | FrameKind::Noop => {}

            FrameKind::Close => {
                debug!(transport = %transport.kind(), "close frame received");
                if let Some(candidate) = self.slots.abort_upgrade(transport) {
                    if let Err(e) = candidate.handle.close().await {
                        debug!(error = %e, "failed to close candidate transport");
                    }
                    return ControlFlow::Continue(());
                }
                if let Some(current) = self.slots.detach_current(transport)
                    && let Err(e) = current.handle.close().await
                {
                    debug!(error = %e, "failed to close transport");
                }
                return ControlFlow::Break(());
            }

            FrameKind::Ping => {
                let probe = frame.is_probe() && self.state() == ConnectionState::Upgrading;
                let reply_to = if probe {
                    self.slots.candidate()
                } else {
                    self.slots.current()
                };

                if let Some(reply_to) = reply_to
                    && let Err(e) = self
                        .write_control(&reply_to, Frame::new(FrameKind::Pong, frame.data))
                        .await
                {
                    debug!(error = %e, "failed to answer ping");
                }
                let _ = liveness.send(Liveness::AnsweredPing);

                if probe {
                    self.finish_probe().await;
                }
            }

            FrameKind::Pong => {
                let _ = liveness.send(Liveness::ObservedPong);
                if frame.is_probe() && self.state() == ConnectionState::Upgrading {
                    self.finish_probe().await;
                }
            }

            FrameKind::Message => {
                let delivered = tokio::select! {
                    result = handoff.push(frame) => result.is_ok(),
                    () = self.wait_closing() => false,
                };
                if !delivered {
                    return ControlFlow::Break(());
                }
            }

            FrameKind::Upgrade => self.complete_upgrade().await,
        }

        ControlFlow::Continue(())
    }

    /// The probe succeeded: flush the old transport and commit the new one.
    async fn finish_probe(&self) {
        let Some(candidate) = self.slots.candidate() else {
            return;
        };

        {
            let _guard = self.write_lock.lock().await;
            if let Some(current) = self.slots.current()
                && let Err(e) = current.send_frame(Frame::empty(FrameKind::Noop)).await
            {
                debug!(error = %e, "failed to flush current transport");
            }
            if let Err(e) = candidate.send_frame(Frame::empty(FrameKind::Upgrade)).await {
                warn!(error = %e, "upgrade frame not delivered");
                return;
            }
        }

        self.complete_upgrade().await;
    }

    /// Swaps the candidate in and closes the former transport.
    async fn complete_upgrade(&self) {
        let Some(previous) = self.slots.complete_upgrade() else {
            return;
        };

        info!(
            from = %previous.kind,
            to = ?self.transport(),
            "transport upgraded"
        );
        if let Err(e) = previous.handle.close().await {
            debug!(error = %e, "failed to close former transport");
        }
    }

    /// Resolves once the connection leaves the open states.
    async fn wait_closing(&self) {
        let mut changes = self.slots.subscribe();
        let _ = changes.wait_for(|state| !state.is_open()).await;
    }
}

// ============================================================================
// Connection - Keepalive Loop
// ============================================================================

impl Connection {
    async fn run_keepalive(self: Arc<Self>, mut liveness: mpsc::UnboundedReceiver<Liveness>) {
        let mut last_pong = Instant::now();
        let mut last_ping = last_pong;

        loop {
            tokio::select! {
                signal = liveness.recv() => match signal {
                    Some(Liveness::ObservedPong) => {
                        last_pong = Instant::now();
                        last_ping = last_pong;
                    }
                    Some(Liveness::AnsweredPing) => last_pong = Instant::now(),
                    None => {
                        trace!("keepalive loop terminated");
                        return;
                    }
                },

                () = sleep_until(last_ping + self.ping_interval) => {
                    if self.state().is_open()
                        && let Some(current) = self.slots.current()
                        && let Err(e) = self.write_control(&current, Frame::empty(FrameKind::Ping)).await
                    {
                        debug!(error = %e, "failed to send ping");
                    }
                    last_ping = Instant::now();
                }

                () = sleep_until(last_pong + self.ping_timeout) => {
                    warn!(
                        sid = %self.session_id,
                        timeout_ms = self.ping_timeout.as_millis() as u64,
                        "ping timeout, closing connection"
                    );
                    if let Err(e) = self.close().await {
                        debug!(error = %e, "close after ping timeout failed");
                    }
                    return;
                }
            }
        }
    }
}

// ============================================================================
// ConnWriter
// ============================================================================

/// Buffered writer for one outbound message frame.
///
/// Holds the connection-wide write lock until [`close`](Self::close)d or
/// dropped. Dropping without closing sends nothing.
pub struct ConnWriter {
    transport: Arc<dyn Transport>,
    message_type: MessageType,
    buffer: Vec<u8>,
    _guard: OwnedMutexGuard<()>,
}

impl fmt::Debug for ConnWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnWriter")
            .field("transport", &self.transport.kind())
            .field("message_type", &self.message_type)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

impl ConnWriter {
    /// Sends the buffered bytes as one message frame and releases the lock.
    ///
    /// # Errors
    ///
    /// Returns the transport's write error.
    pub async fn close(self) -> Result<()> {
        let Self {
            transport,
            message_type,
            buffer,
            _guard: guard,
        } = self;

        let result = transport
            .send_frame(Frame::message(message_type, buffer))
            .await;
        drop(guard);
        result
    }
}

impl io::Write for ConnWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Read, Write};

    use tokio_test::{assert_err, assert_ok};

    use crate::transport::{MemoryFactory, MemoryListener, MemoryPeer, PROBE_PAYLOAD as PROBE_TEXT};

    const HANDSHAKE: &str =
        r#"{"sid":"abc","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":60000}"#;

    const FAST_HANDSHAKE: &str =
        r#"{"sid":"abc","upgrades":[],"pingInterval":100,"pingTimeout":300}"#;

    fn options(transport: TransportKind) -> (ConnectOptions, MemoryListener) {
        let (polling, listener) = MemoryFactory::new(TransportKind::Polling);
        let stream = polling.sibling(TransportKind::Stream);

        let mut factories = TransportFactories::new();
        factories.insert(TransportKind::Polling, Arc::new(polling));
        factories.insert(TransportKind::Stream, Arc::new(stream));

        let url = Url::parse("http://localhost:8000/socket.io/?EIO=3").expect("valid url");
        (ConnectOptions::new(url, transport, factories), listener)
    }

    async fn serve_handshake(listener: &mut MemoryListener, handshake: &str) -> MemoryPeer {
        let (request, probe) = listener.accept().await.expect("handshake request");
        assert_eq!(request.session_id, None);
        assert_eq!(request.query("transport").as_deref(), Some("polling"));
        probe
            .send(Frame::new(FrameKind::Open, handshake))
            .expect("send handshake");

        let (request, polling) = listener.accept().await.expect("confirm request");
        assert_eq!(request.query("sid").as_deref(), Some("abc"));
        polling
            .send(Frame::message(MessageType::Text, "40"))
            .expect("send confirmation");
        polling
    }

    async fn open_with(handshake: &str) -> (Arc<Connection>, MemoryPeer) {
        let (options, mut listener) = options(TransportKind::Polling);
        let (connection, polling) = tokio::join!(
            Connection::open(options),
            serve_handshake(&mut listener, handshake)
        );
        (connection.expect("open"), polling)
    }

    async fn open_upgrading() -> (Arc<Connection>, MemoryPeer, MemoryPeer) {
        let (options, mut listener) = options(TransportKind::Stream);
        let server = async {
            let polling = serve_handshake(&mut listener, HANDSHAKE).await;
            let (request, stream) = listener.accept().await.expect("upgrade request");
            assert_eq!(request.kind, TransportKind::Stream);
            assert_eq!(request.url.scheme(), "ws");
            assert_eq!(request.query("transport").as_deref(), Some("websocket"));
            assert_eq!(request.query("sid").as_deref(), Some("abc"));
            (polling, stream)
        };
        let (connection, (polling, stream)) = tokio::join!(Connection::open(options), server);
        (connection.expect("open"), polling, stream)
    }

    /// Receives the next frame that is not a keepalive ping.
    async fn recv_skipping_pings(peer: &MemoryPeer) -> Option<Frame> {
        loop {
            match peer.recv().await {
                Some(frame) if frame.kind == FrameKind::Ping => continue,
                other => return other,
            }
        }
    }

    async fn wait_for_state(connection: &Connection, expected: ConnectionState) {
        let mut changes = connection.state_changes();
        timeout(Duration::from_secs(5), changes.wait_for(|s| *s == expected))
            .await
            .expect("state reached in time")
            .expect("state channel open");
    }

    #[tokio::test]
    async fn test_polling_handshake() {
        let (connection, _polling) = open_with(HANDSHAKE).await;

        assert_eq!(connection.state(), ConnectionState::Normal);
        assert_eq!(connection.session_id().as_str(), "abc");
        assert_eq!(connection.ping_interval(), Duration::from_secs(25));
        assert_eq!(connection.ping_timeout(), Duration::from_secs(60));
        assert_eq!(connection.upgrades(), ["websocket".to_string()]);
        assert_eq!(connection.transport(), Some(TransportKind::Polling));
    }

    #[tokio::test]
    async fn test_upgrade_requested_sends_probe() {
        let (connection, _polling, stream) = open_upgrading().await;

        assert_eq!(connection.state(), ConnectionState::Upgrading);
        assert_eq!(connection.transport(), Some(TransportKind::Polling));

        let probe = stream.recv().await.expect("probe frame");
        assert_eq!(probe.kind, FrameKind::Ping);
        assert_eq!(probe.text(), Some(PROBE_TEXT));
    }

    #[tokio::test]
    async fn test_probe_pong_then_upgrade_completes() {
        let (connection, polling, stream) = open_upgrading().await;
        assert_eq!(stream.recv().await.map(|f| f.kind), Some(FrameKind::Ping));

        stream
            .send(Frame::new(FrameKind::Pong, PROBE_TEXT))
            .expect("send pong");
        stream
            .send(Frame::empty(FrameKind::Upgrade))
            .expect("send upgrade");
        stream
            .send(Frame::message(MessageType::Text, "after"))
            .expect("send message");

        wait_for_state(&connection, ConnectionState::Normal).await;

        // The client commits on the candidate and flushes the old transport
        assert_eq!(stream.recv().await.map(|f| f.kind), Some(FrameKind::Upgrade));
        let mut flushed = Vec::new();
        while let Some(frame) = polling.recv().await {
            flushed.push(frame.kind);
        }
        assert!(flushed.contains(&FrameKind::Noop));

        // The trailing Upgrade frame was processed before this message
        let reader = connection.next_reader().await.expect("message");
        assert_eq!(reader.as_bytes(), b"after");
        drop(reader);

        assert_eq!(connection.transport(), Some(TransportKind::Stream));
        assert_eq!(polling.close_count(), 1);
        assert!(!stream.is_closed());
    }

    #[tokio::test]
    async fn test_probe_ping_from_server_completes_upgrade() {
        let (connection, polling, stream) = open_upgrading().await;
        assert_eq!(stream.recv().await.map(|f| f.kind), Some(FrameKind::Ping));

        stream.send(Frame::probe()).expect("send probe ping");

        let pong = stream.recv().await.expect("pong");
        assert_eq!(pong.kind, FrameKind::Pong);
        assert_eq!(pong.text(), Some(PROBE_TEXT));
        assert_eq!(stream.recv().await.map(|f| f.kind), Some(FrameKind::Upgrade));

        wait_for_state(&connection, ConnectionState::Normal).await;
        assert_eq!(connection.transport(), Some(TransportKind::Stream));
        while polling.recv().await.is_some() {}
        assert_eq!(polling.close_count(), 1);
    }

    #[tokio::test]
    async fn test_candidate_failure_reverts_to_current() {
        let (connection, polling, stream) = open_upgrading().await;
        stream.close();

        wait_for_state(&connection, ConnectionState::Normal).await;
        assert_eq!(connection.transport(), Some(TransportKind::Polling));

        polling
            .send(Frame::message(MessageType::Text, "still here"))
            .expect("send");
        let reader = connection.next_reader().await.expect("message");
        assert_eq!(reader.as_bytes(), b"still here");
    }

    #[tokio::test]
    async fn test_write_waits_for_upgrade() {
        let (connection, _polling, stream) = open_upgrading().await;
        assert_eq!(stream.recv().await.map(|f| f.kind), Some(FrameKind::Ping));

        let writer = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move {
                connection
                    .send_message(MessageType::Text, b"queued")
                    .await
            })
        };
        tokio::task::yield_now().await;

        stream
            .send(Frame::new(FrameKind::Pong, PROBE_TEXT))
            .expect("send pong");
        assert_ok!(writer.await.expect("join"));

        assert_eq!(stream.recv().await.map(|f| f.kind), Some(FrameKind::Upgrade));
        let frame = stream.recv().await.expect("message");
        assert_eq!(frame.kind, FrameKind::Message);
        assert_eq!(frame.data, b"queued");
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_fails_when_upgrade_stalls() {
        let (connection, _polling, _stream) = open_upgrading().await;

        let result = connection.next_writer(MessageType::Text).await;
        assert!(matches!(result, Err(Error::TransportUnavailable { .. })));
        assert_eq!(connection.state(), ConnectionState::Upgrading);
    }

    #[tokio::test]
    async fn test_writer_emits_single_frame() {
        let (connection, polling) = open_with(HANDSHAKE).await;

        let mut writer = connection
            .next_writer(MessageType::Text)
            .await
            .expect("writer");
        writer.write_all(b"2[\"a\",").expect("buffer");
        writer.write_all(b"1]").expect("buffer");
        writer.close().await.expect("close");

        let frame = recv_skipping_pings(&polling).await.expect("frame");
        assert_eq!(frame, Frame::message(MessageType::Text, "2[\"a\",1]"));
    }

    #[tokio::test]
    async fn test_reader_exposes_payload() {
        let (connection, polling) = open_with(HANDSHAKE).await;
        polling
            .send(Frame::message(MessageType::Binary, vec![1, 2, 3]))
            .expect("send");

        let mut reader = connection.next_reader().await.expect("reader");
        assert_eq!(reader.message_type(), MessageType::Binary);
        let mut data = Vec::new();
        reader.read_to_end(&mut data).expect("read");
        assert_eq!(data, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_answers_server_ping() {
        let (_connection, polling) = open_with(HANDSHAKE).await;
        polling
            .send(Frame::new(FrameKind::Ping, "hb"))
            .expect("send ping");

        let pong = polling.recv().await.expect("pong");
        assert_eq!(pong, Frame::new(FrameKind::Pong, "hb"));
    }

    #[tokio::test]
    async fn test_close_is_graceful_and_idempotent() {
        let (connection, polling) = open_with(HANDSHAKE).await;

        assert_ok!(connection.close().await);
        assert_ok!(connection.close().await);

        assert_eq!(
            recv_skipping_pings(&polling).await.map(|f| f.kind),
            Some(FrameKind::Close)
        );
        wait_for_state(&connection, ConnectionState::Closed).await;
        assert!(matches!(
            connection.next_reader().await,
            Err(Error::EndOfStream)
        ));
        assert_err!(connection.next_writer(MessageType::Text).await);
    }

    #[tokio::test]
    async fn test_server_close_frame_ends_connection() {
        let (connection, polling) = open_with(HANDSHAKE).await;

        let waiter = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move { connection.next_reader().await })
        };
        polling.send(Frame::empty(FrameKind::Close)).expect("send");

        let result = waiter.await.expect("join");
        assert!(matches!(result, Err(Error::EndOfStream)));
        wait_for_state(&connection, ConnectionState::Closed).await;
    }

    #[tokio::test]
    async fn test_close_closes_transport_once() {
        let (connection, polling) = open_with(HANDSHAKE).await;

        assert_ok!(connection.close().await);
        wait_for_state(&connection, ConnectionState::Closed).await;
        tokio::task::yield_now().await;

        assert_eq!(polling.close_count(), 1);
    }

    #[tokio::test]
    async fn test_server_close_frame_closes_transport_once() {
        let (connection, polling) = open_with(HANDSHAKE).await;

        polling.send(Frame::empty(FrameKind::Close)).expect("send");
        wait_for_state(&connection, ConnectionState::Closed).await;
        assert_ok!(connection.close().await);
        tokio::task::yield_now().await;

        assert_eq!(polling.close_count(), 1);
    }

    #[tokio::test]
    async fn test_close_during_upgrade_ends_pending_write() {
        let (connection, polling, stream) = open_upgrading().await;
        assert_eq!(stream.recv().await.map(|f| f.kind), Some(FrameKind::Ping));

        let writer = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move { connection.next_writer(MessageType::Text).await })
        };
        tokio::task::yield_now().await;

        assert_ok!(connection.close().await);
        let result = writer.await.expect("join");
        assert!(matches!(result, Err(Error::EndOfStream)));

        wait_for_state(&connection, ConnectionState::Closed).await;
        tokio::task::yield_now().await;
        assert_eq!(polling.close_count(), 1);
        assert_eq!(stream.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_timeout_closes_connection() {
        let (connection, polling) = open_with(FAST_HANDSHAKE).await;
        assert_eq!(connection.ping_timeout(), Duration::from_millis(300));

        let result = connection.next_reader().await;
        assert!(matches!(result, Err(Error::EndOfStream)));
        assert_eq!(connection.state(), ConnectionState::Closed);

        let mut kinds = Vec::new();
        while let Some(frame) = polling.recv().await {
            kinds.push(frame.kind);
        }
        assert!(kinds.contains(&FrameKind::Ping));
        assert_eq!(kinds.last(), Some(&FrameKind::Close));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pongs_keep_connection_alive() {
        let (connection, polling) = open_with(FAST_HANDSHAKE).await;

        let responder = tokio::spawn(async move {
            let mut pings = 0;
            while let Some(frame) = polling.recv().await {
                if frame.kind == FrameKind::Ping {
                    pings += 1;
                    let _ = polling.send(Frame::empty(FrameKind::Pong));
                }
            }
            pings
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(connection.state(), ConnectionState::Normal);

        assert_ok!(connection.close().await);
        let pings = responder.await.expect("join");
        assert!(pings >= 10, "expected regular pings, saw {pings}");
    }

    #[tokio::test]
    async fn test_missing_stream_factory_fails_fast() {
        let (polling, mut listener) = MemoryFactory::new(TransportKind::Polling);
        let mut factories = TransportFactories::new();
        factories.insert(TransportKind::Polling, Arc::new(polling));
        let url = Url::parse("http://localhost:8000/socket.io/").expect("valid url");

        let result =
            Connection::open(ConnectOptions::new(url, TransportKind::Stream, factories)).await;
        assert!(matches!(result, Err(Error::UnsupportedTransport { .. })));
        assert!(listener.try_accept().is_none());
    }

    #[tokio::test]
    async fn test_malformed_handshake_fails() {
        let (options, mut listener) = options(TransportKind::Polling);
        let server = async {
            let (_, probe) = listener.accept().await.expect("request");
            probe
                .send(Frame::message(MessageType::Text, "nope"))
                .expect("send");
            probe
        };

        let (result, _probe) = tokio::join!(Connection::open(options), server);
        assert!(matches!(
            result,
            Err(Error::HandshakeFailed { stage: "decode", .. })
        ));
    }

    #[tokio::test]
    async fn test_refused_handshake_fails() {
        let (options, mut listener) = options(TransportKind::Polling);
        let server = async {
            let (_, probe) = listener.accept().await.expect("request");
            probe.close();
        };

        let (result, ()) = tokio::join!(Connection::open(options), server);
        let err = result.unwrap_err();
        assert!(matches!(err, Error::HandshakeFailed { stage: "open", .. }));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_handshake_fallback_timings() {
        let (connection, _polling) = open_with(r#"{"sid":"abc"}"#).await;
        assert_eq!(connection.ping_interval(), DEFAULT_PING_INTERVAL);
        assert_eq!(connection.ping_timeout(), DEFAULT_PING_TIMEOUT);
    }
}
