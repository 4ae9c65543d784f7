use std::{
    io,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender as QueueSender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace};

use crate::{
    encoder::LineEncoder,
    point::Point,
    telemetry::{Telemetry, TelemetryUpdate},
    transport::{transmit_or_log, Transport},
    writer::{PayloadWriter, WriteResult},
};

use super::{Sender, SenderStats, Stats};

/// Shortest flush interval the dispatcher will wait for.
pub(crate) const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Lifecycle state of an [`AsyncSender`].
///
/// States only ever move forward: `Created → Running → Draining → Stopped`. A sender that is shut down before it was
/// ever started drains on the calling thread instead, and goes from `Created` straight to `Draining`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SenderState {
    /// The queue accepts points, but no dispatcher is running yet.
    Created,

    /// The dispatcher is running.
    Running,

    /// New points are rejected while the queue is drained and flushed.
    Draining,

    /// All queued points have been flushed and the dispatcher has exited.
    Stopped,
}

impl SenderState {
    const fn as_u8(self) -> u8 {
        match self {
            SenderState::Created => 0,
            SenderState::Running => 1,
            SenderState::Draining => 2,
            SenderState::Stopped => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => SenderState::Created,
            1 => SenderState::Running,
            2 => SenderState::Draining,
            _ => SenderState::Stopped,
        }
    }
}

struct Shared {
    state: AtomicU8,
    stats: Stats,
}

impl Shared {
    fn state(&self) -> SenderState {
        SenderState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves to `next` if it's further along than the current state.
    fn advance(&self, next: SenderState) -> bool {
        self.state.fetch_max(next.as_u8(), Ordering::AcqRel) < next.as_u8()
    }
}

struct Inner {
    shared: Arc<Shared>,
    tx: RwLock<Option<QueueSender<Point>>>,
    dispatcher: Mutex<Option<Dispatcher>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<()>,
}

impl Inner {
    fn shutdown(&self) {
        // Held until the drain completes, so every caller returns only once everything has been flushed.
        let _shutdown = self.shutdown.lock();

        // Dropping the only producer handle disconnects the queue, which the dispatcher sees once it has received
        // everything that was already queued.
        let tx = self.tx.write().take();
        if tx.is_some() {
            self.shared.advance(SenderState::Draining);
            debug!("Asynchronous sender draining.");
        }
        drop(tx);

        // If the dispatcher was never started, drain on this thread instead.
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.run();
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!("Dispatcher thread panicked while draining.");
            }
        }

        self.shared.advance(SenderState::Stopped);
    }

    /// Stops the sender without draining, counting anything still queued as dropped.
    fn abandon(&self) {
        if let Some(tx) = self.tx.write().take() {
            self.shared.stats.track_dropped_many(tx.len() as u64);
        }
        self.shared.advance(SenderState::Stopped);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A sender that queues points and transmits them in batches from a background thread.
///
/// Sending never blocks: points are pushed onto a bounded queue, and if the queue is full, the point is dropped and
/// counted in [`SenderStats::points_dropped`]. A single dispatcher thread drains the queue, batches points into
/// payloads up to the maximum payload length, and hands each payload to the transport. Points from a single producer
/// thread are transmitted in the order they were sent.
///
/// A partially-filled payload is sent once it has been waiting for the flush interval, so points recorded during
/// quiet periods are not held back indefinitely.
///
/// `AsyncSender` is a cheap handle: clones share the same queue and dispatcher. When the last handle is dropped, the
/// sender is shut down as if [`shutdown`](Self::shutdown) had been called.
#[derive(Clone)]
pub struct AsyncSender {
    inner: Arc<Inner>,
}

impl AsyncSender {
    /// Creates a new `AsyncSender` in the [`Created`](SenderState::Created) state.
    ///
    /// Points sent before [`start`](Self::start) is called are queued, up to the queue capacity.
    ///
    /// # Panics
    ///
    /// Panics if `max_payload_len` is too small to hold any point, or if `queue_capacity` is zero. Both are rejected
    /// by [`SenderConfig::validate`](crate::SenderConfig::validate).
    pub fn new(
        transport: Arc<dyn Transport>,
        encoder: LineEncoder,
        max_payload_len: usize,
        queue_capacity: usize,
        flush_interval: Duration,
    ) -> Self {
        assert!(queue_capacity > 0, "queue capacity must be non-zero");

        let (tx, rx) = bounded(queue_capacity);
        let shared = Arc::new(Shared { state: AtomicU8::new(SenderState::Created.as_u8()), stats: Stats::default() });
        let dispatcher = Dispatcher {
            rx,
            transport,
            writer: PayloadWriter::new(max_payload_len, encoder),
            flush_interval: flush_interval.max(MIN_FLUSH_INTERVAL),
            shared: Arc::clone(&shared),
            telemetry_transport: None,
            telemetry: None,
            telemetry_update: TelemetryUpdate::default(),
            dropped_reported: 0,
        };

        AsyncSender {
            inner: Arc::new(Inner {
                shared,
                tx: RwLock::new(Some(tx)),
                dispatcher: Mutex::new(Some(dispatcher)),
                worker: Mutex::new(None),
                shutdown: Mutex::new(()),
            }),
        }
    }

    /// Enables internal telemetry, reported through the `metrics` facade.
    ///
    /// Has no effect once the sender has been started.
    #[must_use]
    pub fn with_telemetry(self, transport_id: &'static str) -> Self {
        if let Some(dispatcher) = self.inner.dispatcher.lock().as_mut() {
            dispatcher.telemetry_transport = Some(transport_id);
        }
        self
    }

    /// Spawns the dispatcher thread, moving the sender to [`Running`](SenderState::Running).
    ///
    /// Calling this more than once, or after shutdown, does nothing.
    ///
    /// # Errors
    ///
    /// If the dispatcher thread cannot be spawned, an error is returned and the sender is stopped. Points already
    /// queued, and any sent afterwards, are counted as dropped.
    pub fn start(&self) -> io::Result<()> {
        let mut dispatcher = self.inner.dispatcher.lock();
        let Some(pending) = dispatcher.take() else {
            return Ok(());
        };

        self.inner.shared.advance(SenderState::Running);
        let spawned = thread::Builder::new()
            .name("metrics-exporter-telegraf-dispatcher".to_string())
            .spawn(move || pending.run());

        match spawned {
            Ok(handle) => {
                *self.inner.worker.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to spawn dispatcher thread.");
                self.inner.abandon();
                Err(e)
            }
        }
    }

    /// Stops accepting points, then drains and flushes everything still queued before returning.
    ///
    /// Points sent after shutdown has begun are dropped. Calling this more than once, or from several threads at once,
    /// is harmless: every call waits for the drain to finish.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SenderState {
        self.inner.shared.state()
    }

    /// Returns the number of points currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.inner.tx.read().as_ref().map_or(0, QueueSender::len)
    }

    /// Returns a snapshot of this sender's statistics.
    pub fn stats(&self) -> SenderStats {
        self.inner.shared.stats.snapshot()
    }
}

impl Sender for AsyncSender {
    fn send(&self, point: Point) {
        let result = match self.inner.tx.read().as_ref() {
            Some(tx) => tx.try_send(point).map_err(|e| match e {
                TrySendError::Full(_) => "queue full",
                TrySendError::Disconnected(_) => "dispatcher gone",
            }),
            None => Err("sender shut down"),
        };

        let stats = &self.inner.shared.stats;
        match result {
            Ok(()) => stats.track_accepted(),
            Err(reason) => {
                stats.track_dropped();
                trace!(reason, "Dropped point.");
            }
        }
    }

    fn shutdown(&self) {
        AsyncSender::shutdown(self);
    }
}

/// The consuming half of an `AsyncSender`.
struct Dispatcher {
    rx: Receiver<Point>,
    transport: Arc<dyn Transport>,
    writer: PayloadWriter,
    flush_interval: Duration,
    shared: Arc<Shared>,
    telemetry_transport: Option<&'static str>,
    telemetry: Option<Telemetry>,
    telemetry_update: TelemetryUpdate,
    dropped_reported: u64,
}

impl Dispatcher {
    /// Runs until the queue is disconnected and drained.
    fn run(mut self) {
        debug!(flush_interval = ?self.flush_interval, "Dispatcher started.");

        // Deadline at which the current partial payload must be sent, if there is one. An interval too long to be
        // represented as a deadline leaves the partial payload waiting for the size limit or for shutdown.
        let mut deadline: Option<Instant> = None;
        loop {
            // Waits of an unrepresentable length are treated by `recv_timeout` as waiting forever.
            let wait = deadline.map_or(self.flush_interval, |d| d.saturating_duration_since(Instant::now()));
            match self.rx.recv_timeout(wait) {
                Ok(point) => {
                    self.write(&point, &mut deadline);

                    // Drain whatever else is already queued, without letting a busy queue hold back a partial payload
                    // past its deadline.
                    while let Ok(point) = self.rx.try_recv() {
                        self.write(&point, &mut deadline);
                        if deadline.is_some_and(|d| d <= Instant::now()) {
                            self.flush(true);
                            deadline = None;
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.flush(true);
                    deadline = None;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.flush(true);
                    break;
                }
            }
        }

        self.shared.advance(SenderState::Stopped);
        debug!("Dispatcher stopped.");
    }

    fn write(&mut self, point: &Point, deadline: &mut Option<Instant>) {
        if self.writer.write_point(point) == WriteResult::Oversized {
            debug!(measurement = point.measurement(), "Point exceeds maximum payload length; sending it alone.");
            self.shared.stats.track_oversized();
            self.telemetry_update.track_point_oversized();
        }

        // Payloads completed by the size limit go out right away; the new partial payload starts its own clock.
        if self.writer.has_ready() {
            self.flush(false);
            *deadline = None;
        }
        if deadline.is_none() && self.writer.has_partial() {
            *deadline = Instant::now().checked_add(self.flush_interval);
        }
    }

    /// Sends all finalized payloads, and the partial payload too if `include_partial` is `true`.
    fn flush(&mut self, include_partial: bool) {
        let mut payloads = if include_partial { self.writer.payloads() } else { self.writer.ready_payloads() };

        let payloads_total = payloads.len();
        let mut payloads_failed = 0;
        while let Some(payload) = payloads.next_payload() {
            let sent = transmit_or_log(&*self.transport, payload.bytes);
            self.shared.stats.track_payload(sent, payload.points, payload.bytes.len());
            if sent {
                self.telemetry_update.track_packet_send_succeeded(payload.points, payload.bytes.len());
            } else {
                self.telemetry_update.track_packet_send_failed(payload.points, payload.bytes.len());
                payloads_failed += 1;
            }
        }
        drop(payloads);

        if payloads_total > 0 {
            trace!(payloads_total, payloads_failed, "Finished sending payloads.");
        }

        self.update_telemetry();
    }

    fn update_telemetry(&mut self) {
        let points_dropped = self.shared.stats.points_dropped();
        self.telemetry_update.track_points_dropped(points_dropped - self.dropped_reported);
        self.dropped_reported = points_dropped;

        // Lazily initialized, so that the counters are registered with whichever recorder is installed by the time
        // points are actually flowing.
        if let Some(transport_id) = self.telemetry_transport {
            if self.telemetry_update.had_updates() {
                let telemetry = self.telemetry.get_or_insert_with(|| Telemetry::new(transport_id));
                telemetry.apply_update(&self.telemetry_update);
            }
        }
        self.telemetry_update.clear();
    }
}
