use std::time::{Duration, Instant};

use metrics_exporter_telegraf::{global, SenderConfig};

fn main() {
    tracing_subscriber::fmt::init();

    let sender = global()
        .configure_async(
            SenderConfig::new("localhost")
                .with_maximum_payload_length(1432)
                .with_flush_interval(Duration::from_millis(200)),
        )
        .expect("failed to configure client");

    // Record a burst of points from a few threads, then flush and report what happened.
    let started = Instant::now();
    let workers: Vec<_> = (0..4)
        .map(|worker| {
            std::thread::spawn(move || {
                let worker = worker.to_string();
                for i in 0..25_000 {
                    global().record_value_sampled("work_item", i, &[("worker", worker.as_str())], 50);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }

    global().shutdown();

    let stats = sender.stats();
    println!(
        "accepted {} points, dropped {}, sent {} in {} payloads ({} bytes) in {:?}",
        stats.points_accepted,
        stats.points_dropped,
        stats.points_sent,
        stats.payloads_sent,
        stats.bytes_sent,
        started.elapsed(),
    );
}
