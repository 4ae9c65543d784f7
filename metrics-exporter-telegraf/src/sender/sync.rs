use std::sync::{Arc, OnceLock};

use tracing::warn;

use crate::{
    encoder::LineEncoder,
    point::Point,
    telemetry::{Telemetry, TelemetryUpdate},
    transport::{transmit_or_log, Transport},
};

use super::{Sender, SenderStats, Stats};

/// A sender that encodes and transmits each point on the calling thread.
///
/// Every point is sent as its own datagram. A point whose encoding exceeds the maximum payload length is still sent,
/// best-effort, as a single oversized datagram: the collector may still accept it if its read buffer is large enough,
/// and dropping it here would turn a possible loss into a certain one.
pub struct SyncSender {
    transport: Arc<dyn Transport>,
    encoder: LineEncoder,
    max_payload_len: usize,
    stats: Stats,
    telemetry: Option<OnceLock<Telemetry>>,
    transport_id: &'static str,
}

impl SyncSender {
    /// Creates a new `SyncSender`.
    pub fn new(transport: Arc<dyn Transport>, encoder: LineEncoder, max_payload_len: usize) -> Self {
        SyncSender {
            transport,
            encoder,
            max_payload_len,
            stats: Stats::default(),
            telemetry: None,
            transport_id: "udp",
        }
    }

    /// Enables internal telemetry, reported through the `metrics` facade.
    #[must_use]
    pub fn with_telemetry(mut self, transport_id: &'static str) -> Self {
        self.telemetry = Some(OnceLock::new());
        self.transport_id = transport_id;
        self
    }

    /// Returns a snapshot of this sender's statistics.
    pub fn stats(&self) -> SenderStats {
        self.stats.snapshot()
    }

    fn update_telemetry(&self, update: &TelemetryUpdate) {
        // Registered lazily, so that the counters are created through whichever recorder is installed by the time
        // points actually start flowing.
        if let Some(telemetry) = &self.telemetry {
            telemetry.get_or_init(|| Telemetry::new(self.transport_id)).apply_update(update);
        }
    }
}

impl Sender for SyncSender {
    fn send(&self, point: Point) {
        self.stats.track_accepted();

        let mut telemetry_update = TelemetryUpdate::default();
        let payload = self.encoder.encode_to_vec(&point);
        if payload.len() > self.max_payload_len {
            warn!(
                measurement = point.measurement(),
                payload_len = payload.len(),
                max_payload_len = self.max_payload_len,
                "Point exceeds maximum payload length; sending oversized datagram."
            );
            self.stats.track_oversized();
            telemetry_update.track_point_oversized();
        }

        let sent = transmit_or_log(&*self.transport, &payload);
        self.stats.track_payload(sent, 1, payload.len());
        if sent {
            telemetry_update.track_packet_send_succeeded(1, payload.len());
        } else {
            telemetry_update.track_packet_send_failed(1, payload.len());
        }

        self.update_telemetry(&telemetry_update);
    }
}
