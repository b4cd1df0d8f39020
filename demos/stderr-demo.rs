use std::sync::Arc;
use std::thread;
use std::time::Duration;

use process_reporter::{Family, MetricSink, ProcessProbes, ReporterOptions};

struct StderrSink;

impl MetricSink for StderrSink {
    fn timing(&self, name: &str, value: f64) {
        eprintln!("{name}:{value}|ms");
    }

    fn gauge(&self, name: &str, value: f64) {
        eprintln!("{name}:{value}|g");
    }
}

fn main() {
    pretty_env_logger::formatted_builder()
        .parse_filters("debug")
        .init();

    let probes = Arc::new(ProcessProbes::new());
    let reporter = process_reporter::create(
        ReporterOptions::new(Arc::new(StderrSink))
            .with_prefix("demo")
            .with_probes(probes.clone())
            .with_interval(Family::Request, Duration::from_millis(250)),
    )
    .expect("valid options");
    reporter.bootstrap().expect("GC bridge has room");

    for _ in 0..8 {
        let _request = probes.requests().track();
        thread::sleep(Duration::from_millis(250));
    }

    eprintln!("cached memory usage: {:?}", reporter.get_cached_memory_usage());
    eprintln!("cached lag: {:?}", reporter.get_cached_lag_time());
    reporter.destroy();
}
