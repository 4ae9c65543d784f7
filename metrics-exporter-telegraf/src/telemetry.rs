use metrics::{counter, Counter};

/// Client telemetry.
///
/// `Telemetry` collects information about the client's own behavior and, when enabled, reports it as normal counters
/// through whichever `metrics` recorder is installed globally.
pub struct Telemetry {
    points_sent: Counter,
    points_dropped: Counter,
    points_oversized: Counter,
    packets_sent: Counter,
    packets_dropped: Counter,
    bytes_sent: Counter,
    bytes_dropped: Counter,
}

impl Telemetry {
    /// Creates a `Telemetry` instance.
    pub fn new(transport: &'static str) -> Self {
        let base_labels = telemetry_tags!("client_transport" => transport);

        Self {
            points_sent: counter!("telegraf.client.points_sent", base_labels.iter()),
            points_dropped: counter!("telegraf.client.points_dropped", base_labels.iter()),
            points_oversized: counter!("telegraf.client.points_oversized", base_labels.iter()),
            packets_sent: counter!("telegraf.client.packets_sent", base_labels.iter()),
            packets_dropped: counter!("telegraf.client.packets_dropped", base_labels.iter()),
            bytes_sent: counter!("telegraf.client.bytes_sent", base_labels.iter()),
            bytes_dropped: counter!("telegraf.client.bytes_dropped", base_labels.iter()),
        }
    }

    /// Applies the given telemetry update, updating the internal metrics.
    pub fn apply_update(&self, update: &TelemetryUpdate) {
        self.points_sent.increment(update.points_sent);
        self.points_dropped.increment(update.points_dropped);
        self.points_oversized.increment(update.points_oversized);
        self.packets_sent.increment(update.packets_sent);
        self.packets_dropped.increment(update.packets_dropped);
        self.bytes_sent.increment(update.bytes_sent);
        self.bytes_dropped.increment(update.bytes_dropped);
    }
}

/// A buffer for collecting telemetry updates.
#[derive(Debug, Default)]
pub struct TelemetryUpdate {
    points_sent: u64,
    points_dropped: u64,
    points_oversized: u64,
    packets_sent: u64,
    packets_dropped: u64,
    bytes_sent: u64,
    bytes_dropped: u64,
}

impl TelemetryUpdate {
    /// Clears the update buffer, resetting it back to an empty state.
    pub fn clear(&mut self) {
        *self = TelemetryUpdate::default();
    }

    /// Returns `true` if any updates have been recorded.
    pub fn had_updates(&self) -> bool {
        self.points_sent > 0 || self.points_dropped > 0 || self.packets_dropped > 0
    }

    /// Tracks points that were dropped before being encoded.
    pub fn track_points_dropped(&mut self, count: u64) {
        self.points_dropped += count;
    }

    /// Tracks a point that exceeded the maximum payload length on its own.
    pub fn track_point_oversized(&mut self) {
        self.points_oversized += 1;
    }

    /// Tracks a successful packet send.
    pub fn track_packet_send_succeeded(&mut self, points: usize, bytes_len: usize) {
        self.points_sent += points as u64;
        self.packets_sent += 1;
        self.bytes_sent += bytes_len as u64;
    }

    /// Tracks a failed packet send.
    pub fn track_packet_send_failed(&mut self, points: usize, bytes_len: usize) {
        self.points_dropped += points as u64;
        self.packets_dropped += 1;
        self.bytes_dropped += bytes_len as u64;
    }
}

macro_rules! _telemetry_tags {
    ($($k:literal => $v:expr),*) => {
        [
            ::metrics::Label::from_static_parts("client", "rust"),
            ::metrics::Label::from_static_parts("client_version", env!("CARGO_PKG_VERSION")),
            $(::metrics::Label::from_static_parts($k, $v),)*
        ]
    };
}

pub(crate) use _telemetry_tags as telemetry_tags;
