#![cfg(feature = "test")]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use process_reporter::test::{CountingGcSource, FakeProbes, RecordingSink};
use process_reporter::{
    Family, GcBridge, ManualTimers, MetricKind, RawGcStats, ReporterOptions, ReporterSettings,
    ThreadTimers,
};

fn init_logger() {
    let _ = pretty_env_logger::try_init();
}

fn manual_options(sink: &Arc<RecordingSink>, timers: &Arc<ManualTimers>) -> ReporterOptions {
    ReporterOptions::new(sink.clone())
        .with_prefix("")
        .with_timers(timers.clone())
        .with_probes(FakeProbes::new())
        .with_gc_bridge(GcBridge::with_capacity(8).unwrap())
}

#[test]
fn test_real_timers_fill_cache() {
    init_logger();
    let sink = RecordingSink::new();
    let timers = Arc::new(ThreadTimers::new());
    let reporter = process_reporter::create(
        ReporterOptions::new(sink.clone())
            .with_timers(timers.clone())
            .with_probes(FakeProbes::new())
            .with_gc_bridge(GcBridge::with_capacity(1).unwrap())
            .with_interval(Family::Lag, Duration::from_millis(10))
            .with_interval(Family::Memory, Duration::from_millis(10)),
    )
    .unwrap();

    reporter.bootstrap().unwrap();
    thread::sleep(Duration::from_millis(200));
    reporter.destroy();

    assert!(reporter.get_cached_lag_time().is_some());
    assert!(reporter.get_cached_memory_usage().is_some());
    assert_eq!(timers.pending_count(), 0);

    // nothing fires after destroy
    thread::sleep(Duration::from_millis(20));
    sink.fetch_and_clear();
    thread::sleep(Duration::from_millis(50));
    assert!(sink.is_empty());
}

#[test]
fn test_settings_drive_reporter() {
    init_logger();
    let sink = RecordingSink::new();
    let timers = ManualTimers::new();
    let settings: ReporterSettings = serde_json::from_str(
        r#"{
            "prefix": "worker",
            "handleInterval": 10,
            "requestEnabled": false,
            "memoryEnabled": false,
            "lagEnabled": false
        }"#,
    )
    .unwrap();
    let reporter =
        process_reporter::create(manual_options(&sink, &timers).with_settings(settings)).unwrap();

    reporter.bootstrap().unwrap();
    timers.advance(Duration::from_millis(30));

    let records = sink.fetch_and_clear();
    assert_eq!(records.len(), 3);
    for record in records {
        assert_eq!(record.name, "worker.process-reporter.handles");
        assert_eq!(record.kind, MetricKind::Timing);
    }
}

#[test]
fn test_cluster_sink_receives_lag() {
    init_logger();
    let sink = RecordingSink::new();
    let cluster = RecordingSink::new();
    let timers = ManualTimers::new();
    let probes = FakeProbes::new();
    probes.set_lag_ms(3.0);

    let reporter = process_reporter::create(
        manual_options(&sink, &timers)
            .with_prefix("cluster-test")
            .with_probes(probes.clone())
            .with_cluster_sink(cluster.clone())
            .with_interval(Family::Lag, Duration::from_millis(10))
            .with_enabled(Family::Handle, false)
            .with_enabled(Family::Request, false)
            .with_enabled(Family::Memory, false),
    )
    .unwrap();

    reporter.bootstrap().unwrap();
    timers.advance(Duration::from_millis(15));
    reporter.destroy();

    let primary = sink.fetch_and_clear();
    let cluster = cluster.fetch_and_clear();
    assert_eq!(primary, cluster);
    assert_eq!(cluster.len(), 1);
    assert_eq!(cluster[0].name, "cluster-test.process-reporter.lag-sampler");
    assert_eq!(cluster[0].value, 3.0);
    assert_eq!(probes.start_count(), 1);
    assert_eq!(probes.stop_count(), 1);
}

#[test]
fn test_many_reporters_share_one_bridge() {
    init_logger();
    let bridge = GcBridge::with_capacity(20).unwrap();
    let source = CountingGcSource::new();
    let timers = ManualTimers::new();
    let sinks: Vec<Arc<RecordingSink>> = (0..20).map(|_| RecordingSink::new()).collect();

    let reporters: Vec<_> = sinks
        .iter()
        .map(|sink| {
            let reporter = process_reporter::create(
                manual_options(sink, &timers)
                    .with_gc_bridge(bridge.clone())
                    .with_gc_source(source.clone()),
            )
            .unwrap();
            reporter.bootstrap().unwrap();
            reporter
        })
        .collect();

    assert_eq!(source.install_count(), 1);
    assert_eq!(bridge.subscriber_count(), 20);

    source.emit(RawGcStats {
        gctype: 3,
        pause_ms: 1.0,
        ..Default::default()
    });
    for sink in &sinks {
        let records = sink.fetch_and_clear();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].name, "process-reporter.gc.both.pause-ms");
    }

    drop(reporters);
    assert_eq!(bridge.subscriber_count(), 0);
    assert_eq!(timers.pending_count(), 0);
}

#[test]
fn test_unbounded_interval_bootstraps() {
    init_logger();
    let sink = RecordingSink::new();
    let timers = Arc::new(ThreadTimers::new());
    let reporter = process_reporter::create(
        ReporterOptions::new(sink.clone())
            .with_timers(timers.clone())
            .with_probes(FakeProbes::new())
            .with_gc_bridge(GcBridge::with_capacity(1).unwrap())
            .with_interval(Family::Handle, Duration::MAX)
            .with_interval(Family::Request, Duration::MAX)
            .with_interval(Family::Memory, Duration::MAX)
            .with_interval(Family::Lag, Duration::MAX),
    )
    .unwrap();

    reporter.bootstrap().unwrap();
    assert_eq!(reporter.armed_count(), 4);
    thread::sleep(Duration::from_millis(20));
    assert!(sink.is_empty());

    reporter.destroy();
    assert_eq!(timers.pending_count(), 0);
}
