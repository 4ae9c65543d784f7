use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::point::Point;

mod background;
pub(crate) use self::background::MIN_FLUSH_INTERVAL;
pub use self::background::{AsyncSender, SenderState};

mod sync;
pub use self::sync::SyncSender;

/// A destination for points.
///
/// Sending is fire-and-forget: implementations must never block the caller on network I/O, and never surface
/// transmission failures.
pub trait Sender: Send + Sync {
    /// Arranges for the point to be transmitted.
    fn send(&self, point: Point);

    /// Stops accepting points, flushing anything still pending.
    ///
    /// Senders that don't buffer have nothing to do here.
    fn shutdown(&self) {}
}

impl<S> Sender for Arc<S>
where
    S: Sender + ?Sized,
{
    fn send(&self, point: Point) {
        (**self).send(point);
    }

    fn shutdown(&self) {
        (**self).shutdown();
    }
}

impl<S> Sender for Box<S>
where
    S: Sender + ?Sized,
{
    fn send(&self, point: Point) {
        (**self).send(point);
    }

    fn shutdown(&self) {
        (**self).shutdown();
    }
}

/// A sender that discards every point.
///
/// Used before a client has been configured, or when telemetry is disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSender;

impl Sender for NullSender {
    fn send(&self, _point: Point) {}
}

/// A snapshot of sender statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// Points accepted for sending.
    pub points_accepted: u64,

    /// Points dropped before being encoded, because the queue was full or the sender was shut down.
    pub points_dropped: u64,

    /// Points whose encoding alone exceeded the maximum payload length, and were sent by themselves.
    pub points_oversized: u64,

    /// Points handed to the transport in payloads that were sent successfully.
    pub points_sent: u64,

    /// Payloads sent successfully.
    pub payloads_sent: u64,

    /// Payloads the transport failed to send.
    pub payloads_failed: u64,

    /// Bytes sent successfully.
    pub bytes_sent: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Stats {
    points_accepted: AtomicU64,
    points_dropped: AtomicU64,
    points_oversized: AtomicU64,
    points_sent: AtomicU64,
    payloads_sent: AtomicU64,
    payloads_failed: AtomicU64,
    bytes_sent: AtomicU64,
}

impl Stats {
    pub fn track_accepted(&self) {
        self.points_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn track_dropped(&self) {
        self.track_dropped_many(1);
    }

    pub fn track_dropped_many(&self, count: u64) {
        self.points_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn track_oversized(&self) {
        self.points_oversized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn track_payload(&self, sent: bool, points: usize, bytes_len: usize) {
        if sent {
            self.points_sent.fetch_add(points as u64, Ordering::Relaxed);
            self.payloads_sent.fetch_add(1, Ordering::Relaxed);
            self.bytes_sent.fetch_add(bytes_len as u64, Ordering::Relaxed);
        } else {
            self.payloads_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn points_dropped(&self) -> u64 {
        self.points_dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SenderStats {
        SenderStats {
            points_accepted: self.points_accepted.load(Ordering::Relaxed),
            points_dropped: self.points_dropped.load(Ordering::Relaxed),
            points_oversized: self.points_oversized.load(Ordering::Relaxed),
            points_sent: self.points_sent.load(Ordering::Relaxed),
            payloads_sent: self.payloads_sent.load(Ordering::Relaxed),
            payloads_failed: self.payloads_failed.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}
