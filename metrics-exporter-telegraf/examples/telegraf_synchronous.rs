use std::time::Duration;

use metrics_exporter_telegraf::{Client, FieldValue, SenderConfig};
use rand::Rng;

fn main() {
    tracing_subscriber::fmt::init();

    let client = Client::new();
    let config = SenderConfig::new("localhost")
        .with_server_port(8094)
        .with_tag("service", "demo")
        .with_telemetry(false);
    client.configure(config).expect("failed to configure client");

    let mut rng = rand::rng();

    // Loop over and over, pretending to serve requests.
    loop {
        client.record_count("requests", 1, &[("region", "us")]);
        client.record_value("latency_ms", rng.random_range(0.5..250.0), &[("region", "us")]);
        client.record(
            "pool",
            &[("active", FieldValue::Integer(rng.random_range(0..32))), ("healthy", FieldValue::Boolean(true))],
            &[],
        );

        std::thread::sleep(Duration::from_millis(250));
    }
}
