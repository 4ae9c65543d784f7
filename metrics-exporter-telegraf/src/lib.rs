//! A client for sending measurements to [Telegraf][telegraf], or any other collector that accepts [InfluxDB line
//! protocol][line_protocol] over UDP.
//!
//! [telegraf]: https://github.com/influxdata/telegraf
//! [line_protocol]: https://docs.influxdata.com/influxdb/v2/reference/syntax/line-protocol/
//!
//! # Usage
//!
//! Configure a [`Client`] once, at startup, and hand it to the code that records measurements:
//!
//! ```no_run
//! # use metrics_exporter_telegraf::{Client, SenderConfig};
//! let client = Client::new();
//!
//! // Only the server name is required. Everything else has a default suited to a Telegraf `socket_listener`.
//! let config = SenderConfig::new("telegraf.local")
//!     .with_server_port(8094)
//!     .with_tag("service", "checkout");
//!
//! // Points are queued and sent in batches from a background thread.
//! let sender = client.configure_async(config).expect("failed to configure client");
//!
//! client.record_count("requests", 1, &[("region", "us")]);
//! client.record_value_sampled("latency_ms", 12.5, &[], 10);
//!
//! // Flush whatever is still queued before exiting.
//! client.shutdown();
//! println!("sent {} points", sender.stats().points_sent);
//! ```
//!
//! For the outermost layer of an application, [`global`] returns a process-wide client.
//!
//! # Features
//!
//! ## Fire and forget
//!
//! Recording never fails and never waits on the network. Transmission errors are logged and counted, not surfaced,
//! and there are no retries or acknowledgements: a lost datagram is a lost datagram.
//!
//! ## Synchronous and asynchronous senders
//!
//! [`SyncSender`] encodes and sends each point as its own datagram on the calling thread, which is simple and has no
//! background machinery.
//!
//! [`AsyncSender`] pushes points onto a bounded queue and returns immediately. A dispatcher thread batches them into
//! newline-delimited payloads no larger than the maximum payload length, and sends a partially-filled payload once it
//! has waited for the flush interval. When the queue is full, points are dropped rather than blocking the caller.
//!
//! ## Deduplication
//!
//! Every point carries a `__guid` tag holding a random UUID, so the collector never merges two points that happen to
//! share a measurement, tag set and timestamp.
//!
//! ## Sampling
//!
//! The `_sampled` recording methods take a sample rate as a percentage. Each call is an independent trial: at rate 10,
//! roughly one in ten points is sent.
//!
//! ## Telemetry
//!
//! The client tracks its own behavior (points sent and dropped, payloads and bytes sent) and, unless disabled with
//! [`SenderConfig::with_telemetry`], reports it through the [`metrics`] facade, under the `telegraf.client`
//! namespace.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod client;
pub use self::client::{global, Client};

mod config;
pub use self::config::{ConfigError, SenderConfig};

mod encoder;
pub use self::encoder::LineEncoder;

mod point;
pub use self::point::{FieldValue, Point, PointBuilder, PointError, GUID_TAG};

pub mod sampler;

mod sender;
pub use self::sender::{AsyncSender, NullSender, Sender, SenderState, SenderStats, SyncSender};

mod telemetry;

mod transport;
pub use self::transport::{RemoteAddr, Transport, UdpTransport};

mod writer;

#[cfg(test)]
mod test_util;
