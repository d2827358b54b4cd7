use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use resilink_frame::{decode_envelope, encode_envelope, Frame, LineCodec, MID_NONE};

use crate::config::LinkConfig;
use crate::dedup::SeenWindow;
use crate::error::{LinkError, Result};

/// Byte stream a connection can run over: a TCP socket, an in-memory pipe
/// in tests, or any bridged stream (serial, socket forwarders).
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Transport for T {}

type BoxTransport = Box<dyn Transport>;
type SessionReader = FramedRead<ReadHalf<BoxTransport>, LineCodec>;
type SessionWriter = FramedWrite<WriteHalf<BoxTransport>, LineCodec>;

/// Pause before re-polling the link state after a write lost the race
/// with an outage.
const SEND_RETRY_PAUSE: Duration = Duration::from_millis(20);

/// One end of a resilient link.
///
/// A connection outlives any number of transports. While no transport is
/// bound (or the current one has gone quiet past the keepalive timeout),
/// the link is down: reads park on the inbound queue and QoS writes wait
/// for the next transport instead of failing.
///
/// Cheap to clone; all clones share the same link state.
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Arc<Inner>,
}

/// A bound transport generation. Binding a new transport bumps `gen` and
/// cancels the previous session's tasks, so a stale session's teardown can
/// never tear down its replacement.
struct SessionState {
    gen: u64,
    token: CancellationToken,
}

pub(crate) struct Inner {
    identity: String,
    cfg: LinkConfig,
    /// Link state. `true` only after the current transport has produced at
    /// least one inbound frame, so both directions are known to work.
    status: watch::Sender<bool>,
    session: Mutex<SessionState>,
    writer: Mutex<Option<SessionWriter>>,
    line_tx: mpsc::Sender<Bytes>,
    line_rx: Mutex<mpsc::Receiver<Bytes>>,
    /// Next QoS message ID, cycling 1..=255 and skipping 0.
    next_mid: AtomicU8,
    seen: std::sync::Mutex<SeenWindow>,
    /// Serializes `wait == true` QoS writes.
    qos_gate: Mutex<()>,
    /// Signalled once per session failure; the client supervisor listens.
    pub(crate) session_down: Notify,
    pub(crate) shutdown: CancellationToken,
    connects: AtomicU32,
    start: Instant,
    /// Milliseconds since `start` of the last successful outbound frame.
    /// The keepalive task stays quiet while data writes keep the link warm.
    last_write_ms: std::sync::atomic::AtomicU64,
}

impl Connection {
    /// Create a connection with no transport bound yet.
    pub fn new(identity: impl Into<String>, cfg: LinkConfig) -> Self {
        Self::with_shutdown(identity, cfg, CancellationToken::new())
    }

    pub(crate) fn with_shutdown(
        identity: impl Into<String>,
        cfg: LinkConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let (line_tx, line_rx) = mpsc::channel(cfg.queue_depth);
        let (status, _) = watch::channel(false);
        Connection {
            inner: Arc::new(Inner {
                identity: identity.into(),
                cfg,
                status,
                session: Mutex::new(SessionState {
                    gen: 0,
                    token: shutdown.child_token(),
                }),
                writer: Mutex::new(None),
                line_tx,
                line_rx: Mutex::new(line_rx),
                next_mid: AtomicU8::new(1),
                seen: std::sync::Mutex::new(SeenWindow::new()),
                qos_gate: Mutex::new(()),
                session_down: Notify::new(),
                shutdown,
                connects: AtomicU32::new(0),
                start: Instant::now(),
                last_write_ms: std::sync::atomic::AtomicU64::new(0),
            }),
        }
    }

    /// Bind a fresh transport, replacing any current one.
    ///
    /// The link reports down until the new transport delivers its first
    /// inbound frame.
    pub async fn attach_transport<T: Transport>(&self, transport: T) {
        self.inner.attach(Box::new(transport)).await;
    }

    /// Send one payload. The delimiter is appended on the wire; a single
    /// trailing delimiter in `payload` is tolerated and stripped.
    ///
    /// With `qos` false the payload is transmitted once on the next live
    /// transport, best effort. With `qos` true it is retransmitted across
    /// reconnects until the link survives a full keepalive window after the
    /// send, and the receiving end drops the duplicates; `wait` chooses
    /// whether to block until that confirmation (preserving order with
    /// other waiting writes) or to confirm in the background.
    pub async fn write(&self, payload: impl AsRef<[u8]>, qos: bool, wait: bool) -> Result<()> {
        let payload = payload.as_ref();
        let payload = payload.strip_suffix(b"\n").unwrap_or(payload);
        if payload.contains(&resilink_frame::DELIMITER) {
            return Err(LinkError::Frame(resilink_frame::FrameError::EmbeddedDelimiter));
        }

        if !qos {
            return self
                .inner
                .send_data(MID_NONE, Bytes::copy_from_slice(payload))
                .await;
        }

        let payload = Bytes::copy_from_slice(payload);
        if wait {
            let _ordered = self.inner.qos_gate.lock().await;
            let mid = self.inner.alloc_mid();
            self.inner.send_data(mid, payload.clone()).await?;
            self.inner.confirm_or_resend(mid, payload).await
        } else {
            let mid = self.inner.alloc_mid();
            self.inner.send_data(mid, payload.clone()).await?;
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                if let Err(err) = inner.confirm_or_resend(mid, payload).await {
                    debug!(identity = %inner.identity, mid, %err, "confirmation abandoned");
                }
            });
            Ok(())
        }
    }

    /// Receive the next payload as text. Keepalives and duplicate QoS
    /// retransmissions never show up here.
    ///
    /// Blocks across outages; fails only once the connection is closed.
    pub async fn readline(&self) -> Result<String> {
        let mut line_rx = self.inner.line_rx.lock().await;
        let line = tokio::select! {
            _ = self.inner.shutdown.cancelled() => return Err(LinkError::Closed),
            line = line_rx.recv() => line.ok_or(LinkError::Closed)?,
        };
        String::from_utf8(line.to_vec()).map_err(|_| LinkError::InvalidUtf8)
    }

    /// Current link state. `true` means the bound transport has recently
    /// proven liveness in both directions.
    pub fn status(&self) -> bool {
        *self.inner.status.borrow()
    }

    /// Block until the link is up.
    pub async fn wait_up(&self) -> Result<()> {
        self.inner.wait_up().await
    }

    /// How many times a transport has come up, initial bind included.
    pub fn connects(&self) -> u32 {
        self.inner.connects.load(Ordering::Relaxed)
    }

    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    /// Tear the connection down. Pending reads and writes fail with
    /// [`LinkError::Closed`]; no transport will be bound again.
    pub fn close(&self) {
        self.inner.status.send_replace(false);
        self.inner.shutdown.cancel();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("identity", &self.inner.identity)
            .field("up", &*self.inner.status.borrow())
            .field("connects", &self.connects())
            .finish()
    }
}

impl Inner {
    async fn attach(self: &Arc<Self>, transport: BoxTransport) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let (read_half, write_half) = tokio::io::split(transport);
        let codec = LineCodec::new(self.cfg.max_line);
        let reader = FramedRead::new(read_half, codec.clone());
        let new_writer = FramedWrite::new(write_half, codec);

        let (gen, token) = {
            let mut session = self.session.lock().await;
            session.token.cancel();
            session.gen += 1;
            session.token = self.shutdown.child_token();
            (session.gen, session.token.clone())
        };
        self.status.send_replace(false);
        *self.writer.lock().await = Some(new_writer);
        self.note_write();
        debug!(identity = %self.identity, gen, "transport bound");

        let inner = Arc::clone(self);
        let reader_token = token.clone();
        tokio::spawn(async move { inner.read_loop(reader, gen, reader_token).await });
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.keepalive_loop(gen, token).await });
    }

    /// Session reader. Every inbound frame feeds the watchdog; data frames
    /// are unwrapped, deduplicated and queued. Any failure mode ends the
    /// session.
    async fn read_loop(self: Arc<Self>, mut reader: SessionReader, gen: u64, token: CancellationToken) {
        // The first frame of a session gets a double window: the peer may
        // still be setting the session up on its side.
        let mut window = 2 * self.cfg.timeout;
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => break,
                next = timeout(window, reader.next()) => next,
            };
            let frame = match next {
                Err(_) => {
                    debug!(identity = %self.identity, "keepalive timeout expired");
                    break;
                }
                Ok(None) => {
                    debug!(identity = %self.identity, "transport closed by peer");
                    break;
                }
                Ok(Some(Err(err))) => {
                    warn!(identity = %self.identity, %err, "inbound frame error");
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };
            if token.is_cancelled() {
                break;
            }
            window = self.cfg.timeout;
            if !*self.status.borrow() {
                self.connects.fetch_add(1, Ordering::Relaxed);
                self.status.send_replace(true);
                info!(identity = %self.identity, connects = self.connects.load(Ordering::Relaxed), "link up");
            }
            let line = match frame {
                Frame::Keepalive => continue,
                Frame::Data(line) => line,
            };
            let (mid, payload) = match decode_envelope(&line) {
                Ok(parts) => parts,
                Err(err) => {
                    warn!(identity = %self.identity, %err, "malformed data frame");
                    break;
                }
            };
            if mid != MID_NONE && self.seen().contains(mid) {
                debug!(identity = %self.identity, mid, "duplicate dropped");
                continue;
            }
            // Queue first, record the ID second: on overflow the frame is
            // not accepted, and forcing a reconnect makes the peer
            // retransmit it instead of us losing it.
            match self.line_tx.try_send(payload) {
                Ok(()) => {
                    if mid != MID_NONE {
                        self.seen().insert(mid);
                    }
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(identity = %self.identity, "inbound queue full, forcing reconnect");
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
        self.end_session(gen).await;
    }

    /// Emits a keepalive whenever a quarter of the timeout passes without
    /// any outbound frame.
    async fn keepalive_loop(self: Arc<Self>, gen: u64, token: CancellationToken) {
        let interval = self.cfg.keepalive_interval();
        loop {
            let due = interval.saturating_sub(self.since_last_write());
            if !due.is_zero() {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(due) => {}
                }
                continue;
            }
            if self.send_frame(Frame::Keepalive).await.is_err() {
                break;
            }
        }
        self.end_session(gen).await;
    }

    /// Tear down the session identified by `gen`. A no-op when a newer
    /// transport has already been bound. Idempotent: every session task
    /// runs it on exit, but only the task that initiated the teardown
    /// wakes the supervisor.
    async fn end_session(&self, gen: u64) {
        let initiated = {
            let session = self.session.lock().await;
            if session.gen != gen {
                return;
            }
            let initiated = !session.token.is_cancelled();
            session.token.cancel();
            initiated
        };
        let was_up = self.status.send_replace(false);
        *self.writer.lock().await = None;
        if was_up {
            info!(identity = %self.identity, "link down");
        }
        if initiated {
            self.session_down.notify_one();
        }
    }

    /// Write one frame to the current transport. A write that fails or
    /// stalls for a full timeout drops the writer; the session tasks then
    /// finish the teardown.
    async fn send_frame(&self, frame: Frame) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(LinkError::TransportDown)?;
        match timeout(self.cfg.timeout, writer.send(frame)).await {
            Ok(Ok(())) => {
                self.note_write();
                Ok(())
            }
            Ok(Err(err)) => {
                debug!(identity = %self.identity, %err, "transport write failed");
                *guard = None;
                Err(LinkError::TransportDown)
            }
            Err(_) => {
                debug!(identity = %self.identity, "transport write stalled");
                *guard = None;
                Err(LinkError::TransportDown)
            }
        }
    }

    /// Transmit one data line, waiting out any outage in progress. Returns
    /// once the line has been handed to a live transport.
    async fn send_data(&self, mid: u8, payload: Bytes) -> Result<()> {
        let line = encode_envelope(mid, &payload)?;
        loop {
            self.wait_up().await?;
            match self.send_frame(Frame::Data(line.clone())).await {
                Ok(()) => return Ok(()),
                // The transport died between the status check and the
                // write. Give the watchdog a moment to flip the status.
                Err(LinkError::TransportDown) => tokio::time::sleep(SEND_RETRY_PAUSE).await,
                Err(err) => return Err(err),
            }
        }
    }

    /// QoS confirmation: the transmission counts as delivered once the
    /// link stays up for a full keepalive window after the send. A link
    /// drop inside that window means the peer may never have seen the
    /// frame, so it is sent again with the same ID; the peer's dedup
    /// window absorbs the case where it had.
    async fn confirm_or_resend(&self, mid: u8, payload: Bytes) -> Result<()> {
        loop {
            if self.confirm_window().await? {
                return Ok(());
            }
            debug!(identity = %self.identity, mid, "link dropped inside confirmation window, retransmitting");
            self.send_data(mid, payload.clone()).await?;
        }
    }

    /// True if the link held up for one full timeout.
    async fn confirm_window(&self) -> Result<bool> {
        let mut status = self.status.subscribe();
        let dropped = async {
            loop {
                if !*status.borrow_and_update() {
                    return;
                }
                if status.changed().await.is_err() {
                    return;
                }
            }
        };
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(LinkError::Closed),
            held = timeout(self.cfg.timeout, dropped) => Ok(held.is_err()),
        }
    }

    pub(crate) async fn wait_up(&self) -> Result<()> {
        let mut status = self.status.subscribe();
        loop {
            if self.shutdown.is_cancelled() {
                return Err(LinkError::Closed);
            }
            if *status.borrow_and_update() {
                return Ok(());
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(LinkError::Closed),
                changed = status.changed() => {
                    if changed.is_err() {
                        return Err(LinkError::Closed);
                    }
                }
            }
        }
    }

    fn alloc_mid(&self) -> u8 {
        let mid = self
            .next_mid
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |mid| {
                Some(if mid == u8::MAX { 1 } else { mid + 1 })
            });
        mid.unwrap_or(1)
    }

    fn seen(&self) -> std::sync::MutexGuard<'_, SeenWindow> {
        self.seen.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn note_write(&self) {
        self.last_write_ms
            .store(self.start.elapsed().as_millis() as u64, Ordering::Release);
    }

    fn since_last_write(&self) -> Duration {
        let now = self.start.elapsed().as_millis() as u64;
        let last = self.last_write_ms.load(Ordering::Acquire);
        Duration::from_millis(now.saturating_sub(last))
    }
}
