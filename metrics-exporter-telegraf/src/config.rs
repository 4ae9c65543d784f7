use std::{io, time::Duration};

use thiserror::Error;

use crate::{sender::MIN_FLUSH_INTERVAL, writer::SMALLEST_VALID_PAYLOAD_LEN};

const DEFAULT_SERVER_PORT: u16 = 8094;
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_MAX_PAYLOAD_LEN: usize = 512;
const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(500);
const MAX_FLUSH_INTERVAL: Duration = Duration::from_secs(3600);

/// Errors that could occur while configuring a client.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No server name was provided.
    #[error("server name wasn't provided")]
    MissingServerName,

    /// The server port was zero.
    #[error("server port must be non-zero")]
    InvalidServerPort,

    /// The maximum payload length is too small to hold any point.
    #[error("maximum payload length must be at least {minimum} bytes (got {actual})")]
    InvalidPayloadLength {
        /// Configured length.
        actual: usize,

        /// Smallest allowed length.
        minimum: usize,
    },

    /// The queue capacity was zero.
    #[error("queue capacity must be non-zero")]
    InvalidQueueCapacity,

    /// The flush interval was zero or unreasonably long.
    #[error("flush interval must be between {minimum:?} and {maximum:?} (got {actual:?})")]
    InvalidFlushInterval {
        /// Configured interval.
        actual: Duration,

        /// Shortest allowed interval.
        minimum: Duration,

        /// Longest allowed interval.
        maximum: Duration,
    },

    /// Failed to resolve the remote address.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the resolution failure.
        reason: String,
    },

    /// Failed to create the UDP socket.
    #[error("failed to create socket: {0}")]
    Socket(#[source] io::Error),

    /// Failed to spawn the background thread for the asynchronous sender.
    #[error("failed to spawn background thread for asynchronous sender")]
    Backend,

    /// The client was already configured.
    #[error("client can only be configured once")]
    AlreadyConfigured,
}

/// Sender configuration.
///
/// Only the server name is required; everything else has a default suited to a Telegraf `socket_listener` running on
/// the same network.
#[derive(Clone, Debug)]
pub struct SenderConfig {
    pub(crate) server_name: String,
    pub(crate) server_port: u16,
    pub(crate) max_payload_len: usize,
    pub(crate) tags: Vec<(String, String)>,
    pub(crate) queue_capacity: usize,
    pub(crate) flush_interval: Duration,
    pub(crate) write_timeout: Duration,
    pub(crate) telemetry: bool,
}

impl SenderConfig {
    /// Creates a configuration for sending to the given server.
    pub fn new<S>(server_name: S) -> Self
    where
        S: Into<String>,
    {
        SenderConfig {
            server_name: server_name.into(),
            server_port: DEFAULT_SERVER_PORT,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            tags: Vec::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            telemetry: true,
        }
    }

    /// Set the server port.
    ///
    /// Defaults to 8094.
    #[must_use]
    pub fn with_server_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    /// Set the maximum payload length.
    ///
    /// This controls the maximum size of a single UDP datagram. Points are batched into datagrams up to this size; a
    /// point that is larger than this on its own is still sent, alone, in a single oversized datagram.
    ///
    /// This should generally be set to the same value (or lower) as `udp_packet_size` / the read buffer of the
    /// collector, and below the path MTU to avoid IP fragmentation.
    ///
    /// Defaults to 512 bytes.
    #[must_use]
    pub fn with_maximum_payload_length(mut self, max_payload_len: usize) -> Self {
        self.max_payload_len = max_payload_len;
        self
    }

    /// Adds a static tag to every point.
    ///
    /// Tags set on an individual point take precedence over static tags with the same key.
    #[must_use]
    pub fn with_tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Adds static tags to every point.
    #[must_use]
    pub fn with_tags<I, K, V>(self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        tags.into_iter().fold(self, |config, (k, v)| config.with_tag(k, v))
    }

    /// Set the maximum number of points held in the queue of the asynchronous sender.
    ///
    /// When the queue is full, new points are dropped rather than blocking the caller.
    ///
    /// Defaults to 10,000.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the flush interval of the asynchronous sender.
    ///
    /// A partially-filled payload is sent once it has been waiting this long, which bounds the latency of points
    /// recorded during quiet periods. It must be at least 1 millisecond and at most 1 hour.
    ///
    /// Defaults to 500 milliseconds.
    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Set the write timeout for sending payloads.
    ///
    /// When the write timeout is reached, the payload being sent is dropped without retrying.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets whether or not to emit internal telemetry through the `metrics` facade.
    ///
    /// When enabled, counters describing the client itself (points sent and dropped, payloads and bytes sent, and so
    /// on) are registered with whatever global `metrics` recorder is installed.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: bool) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Returns the server name.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Returns the server port.
    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    /// Returns the maximum payload length.
    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }

    /// Returns the queue capacity of the asynchronous sender.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Checks that the configuration is usable.
    ///
    /// This does not resolve the server name; that happens when a sender is built.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_name.trim().is_empty() {
            return Err(ConfigError::MissingServerName);
        }
        if self.server_port == 0 {
            return Err(ConfigError::InvalidServerPort);
        }
        if self.max_payload_len < SMALLEST_VALID_PAYLOAD_LEN {
            return Err(ConfigError::InvalidPayloadLength {
                actual: self.max_payload_len,
                minimum: SMALLEST_VALID_PAYLOAD_LEN,
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }
        if !(MIN_FLUSH_INTERVAL..=MAX_FLUSH_INTERVAL).contains(&self.flush_interval) {
            return Err(ConfigError::InvalidFlushInterval {
                actual: self.flush_interval,
                minimum: MIN_FLUSH_INTERVAL,
                maximum: MAX_FLUSH_INTERVAL,
            });
        }

        Ok(())
    }
}
