use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, OnceLock,
};

use tracing::debug;

use crate::{
    config::{ConfigError, SenderConfig},
    encoder::LineEncoder,
    point::{FieldValue, Point, PointBuilder},
    sampler::{should_send, FULL_SAMPLE_RATE},
    sender::{AsyncSender, NullSender, Sender, SyncSender},
    transport::{RemoteAddr, Transport, UdpTransport},
};

static NULL_SENDER: NullSender = NullSender;

static GLOBAL: Client = Client::new();

/// Returns the process-wide client.
///
/// This exists for the outermost layer of an application, which configures it once at startup. Everything else should
/// be handed a `&Client` instead of reaching for this.
pub fn global() -> &'static Client {
    &GLOBAL
}

/// Handle for recording points.
///
/// A client starts out unconfigured, in which case every recorded point is silently discarded. It can be configured
/// exactly once, with [`configure`](Self::configure), [`configure_async`](Self::configure_async), or
/// [`install`](Self::install); any later attempt fails with [`ConfigError::AlreadyConfigured`]. A configuration attempt
/// that fails for any other reason leaves the client unconfigured, so it can be tried again.
///
/// Recording never fails and never blocks on the network: invalid points are logged and discarded, and transmission
/// errors are handled by the sender.
pub struct Client {
    sender: OnceLock<Box<dyn Sender>>,
    claimed: AtomicBool,
    sampler: fn(i32) -> bool,
}

impl Client {
    /// Creates an unconfigured client.
    pub const fn new() -> Self {
        Self::with_sampler(should_send)
    }

    /// Creates an unconfigured client that uses the given function to decide whether a sampled point is sent.
    pub const fn with_sampler(sampler: fn(i32) -> bool) -> Self {
        Client { sender: OnceLock::new(), claimed: AtomicBool::new(false), sampler }
    }

    /// Configures the client with a synchronous sender, which transmits each point on the calling thread.
    ///
    /// # Errors
    ///
    /// If the client is already configured, or the configuration is invalid, or the server name can't be resolved, or
    /// the socket can't be created, an error is returned.
    pub fn configure(&self, config: SenderConfig) -> Result<(), ConfigError> {
        let claim = self.claim(&config)?;

        let (transport, transport_id) = connect(&config)?;
        let mut sender = SyncSender::new(transport, LineEncoder::new(config.tags), config.max_payload_len);
        if config.telemetry {
            sender = sender.with_telemetry(transport_id);
        }

        claim.commit(Box::new(sender))
    }

    /// Configures the client with an asynchronous sender, and starts it.
    ///
    /// The returned handle shares its queue with the client, and can be used to observe the sender's state and
    /// statistics.
    ///
    /// # Errors
    ///
    /// In addition to the errors of [`configure`](Self::configure), an error is returned if the dispatcher thread
    /// can't be spawned.
    pub fn configure_async(&self, config: SenderConfig) -> Result<AsyncSender, ConfigError> {
        let claim = self.claim(&config)?;

        let (transport, transport_id) = connect(&config)?;
        let mut sender = AsyncSender::new(
            transport,
            LineEncoder::new(config.tags),
            config.max_payload_len,
            config.queue_capacity,
            config.flush_interval,
        );
        if config.telemetry {
            sender = sender.with_telemetry(transport_id);
        }
        sender.start().map_err(|_| ConfigError::Backend)?;

        claim.commit(Box::new(sender.clone()))?;
        Ok(sender)
    }

    /// Configures the client with the given sender.
    ///
    /// # Errors
    ///
    /// If the client is already configured, an error is returned.
    pub fn install<S>(&self, sender: S) -> Result<(), ConfigError>
    where
        S: Sender + 'static,
    {
        let claim = Claim::acquire(&self.claimed)?;
        claim.commit_to(&self.sender, Box::new(sender))
    }

    /// Returns `true` if the client has been configured.
    pub fn is_configured(&self) -> bool {
        self.sender.get().is_some()
    }

    /// Shuts down the configured sender, flushing any pending points.
    ///
    /// Points recorded afterwards are dropped. Does nothing if the client isn't configured.
    pub fn shutdown(&self) {
        if let Some(sender) = self.sender.get() {
            sender.shutdown();
        }
    }

    /// Records a single-field point, with the field named `value`.
    pub fn record_value<V>(&self, measurement: &str, value: V, tags: &[(&str, &str)])
    where
        V: Into<FieldValue>,
    {
        self.record_value_sampled(measurement, value, tags, FULL_SAMPLE_RATE);
    }

    /// Records a single-field point, with the field named `value`, at the given sample rate.
    ///
    /// The sample rate is a percentage: 100 or more always sends, 0 or less never does.
    pub fn record_value_sampled<V>(&self, measurement: &str, value: V, tags: &[(&str, &str)], sample_rate: i32)
    where
        V: Into<FieldValue>,
    {
        if (self.sampler)(sample_rate) {
            self.dispatch(Point::builder(measurement).field("value", value).tags(tags.iter().copied()));
        }
    }

    /// Records a multi-field point.
    pub fn record(&self, measurement: &str, fields: &[(&str, FieldValue)], tags: &[(&str, &str)]) {
        self.record_sampled(measurement, fields, tags, FULL_SAMPLE_RATE);
    }

    /// Records a multi-field point at the given sample rate.
    pub fn record_sampled(
        &self,
        measurement: &str,
        fields: &[(&str, FieldValue)],
        tags: &[(&str, &str)],
        sample_rate: i32,
    ) {
        if (self.sampler)(sample_rate) {
            let builder = fields
                .iter()
                .fold(Point::builder(measurement), |builder, (key, value)| builder.field(*key, value.clone()));
            self.dispatch(builder.tags(tags.iter().copied()));
        }
    }

    /// Records a single-field point, with the integer field named `count`.
    pub fn record_count(&self, measurement: &str, count: i64, tags: &[(&str, &str)]) {
        self.record_count_sampled(measurement, count, tags, FULL_SAMPLE_RATE);
    }

    /// Records a single-field point, with the integer field named `count`, at the given sample rate.
    pub fn record_count_sampled(&self, measurement: &str, count: i64, tags: &[(&str, &str)], sample_rate: i32) {
        if (self.sampler)(sample_rate) {
            self.dispatch(Point::builder(measurement).field("count", count).tags(tags.iter().copied()));
        }
    }

    fn sender(&self) -> &dyn Sender {
        match self.sender.get() {
            Some(sender) => sender.as_ref(),
            None => &NULL_SENDER,
        }
    }

    fn dispatch(&self, builder: PointBuilder) {
        match builder.build() {
            Ok(point) => self.sender().send(point),
            Err(e) => debug!(error = %e, "Discarding invalid point."),
        }
    }

    fn claim(&self, config: &SenderConfig) -> Result<ClaimedClient<'_>, ConfigError> {
        let claim = Claim::acquire(&self.claimed)?;
        config.validate()?;
        Ok(ClaimedClient { claim, client: self })
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

fn connect(config: &SenderConfig) -> Result<(Arc<dyn Transport>, &'static str), ConfigError> {
    let remote_addr = RemoteAddr::resolve(&config.server_name, config.server_port)
        .map_err(|reason| ConfigError::InvalidRemoteAddress { reason })?;
    let transport_id = remote_addr.transport_id();

    let transport = UdpTransport::connect(remote_addr, config.write_timeout).map_err(ConfigError::Socket)?;
    debug!(remote_addr = %transport.remote_addr(), "Connected transport.");

    Ok((Arc::new(transport), transport_id))
}

/// Exclusive right to configure a client, released again if dropped without being committed.
struct Claim<'a> {
    claimed: &'a AtomicBool,
    committed: bool,
}

impl<'a> Claim<'a> {
    fn acquire(claimed: &'a AtomicBool) -> Result<Self, ConfigError> {
        claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ConfigError::AlreadyConfigured)?;
        Ok(Claim { claimed, committed: false })
    }

    fn commit_to(mut self, slot: &OnceLock<Box<dyn Sender>>, sender: Box<dyn Sender>) -> Result<(), ConfigError> {
        slot.set(sender).map_err(|_| ConfigError::AlreadyConfigured)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.claimed.store(false, Ordering::Release);
        }
    }
}

struct ClaimedClient<'a> {
    claim: Claim<'a>,
    client: &'a Client,
}

impl ClaimedClient<'_> {
    fn commit(self, sender: Box<dyn Sender>) -> Result<(), ConfigError> {
        self.claim.commit_to(&self.client.sender, sender)
    }
}
