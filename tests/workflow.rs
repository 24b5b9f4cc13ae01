use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;

use wpmon::audit::{AuditAction, AuditEntity, AuditFilter};
use wpmon::config::Configuration;
use wpmon::history::HistoryFilter;
use wpmon::local::FileStorage;
use wpmon::monitor::Monitor;
use wpmon::notify::{Level, Notifier};
use wpmon::record::{
    Limits, MeasurementType, NewMeasurement, ParticleLimits, RangeLimits, Reading, TemperatureHumidityLimits,
};
use wpmon::stats::{Direction, Trend};
use wpmon::storage::{self, Storage};
use wpmon::writer::BackgroundStorage;
use wpmon::Error;

fn at(day: u32, hour: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
}

fn draft(day: u32, location: &str, reading: Reading) -> NewMeasurement {
    NewMeasurement {
        date: at(day, 9),
        location: location.to_string(),
        device_id: None,
        notes: None,
        reading,
    }
}

fn torque(value: f64) -> Reading {
    Reading::Torque {
        screwdriver_id: String::from("SD-007"),
        torque_value: value,
        limits: RangeLimits { min: 4.0, max: 6.0 },
    }
}

fn luminosity(value: f64) -> Reading {
    Reading::Luminosity {
        luminosity: value,
        limits: RangeLimits { min: 500.0, max: 1000.0 },
    }
}

fn file_monitor(directory: &std::path::Path) -> Monitor {
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::open(directory).unwrap());
    Monitor::open(storage, Notifier::silent(), "admin").unwrap()
}

#[test]
fn climate_above_maximum_is_out_of_spec() {
    let directory = tempfile::tempdir().unwrap();
    let mut monitor = file_monitor(directory.path());

    let recorded = monitor
        .record(draft(
            1,
            "Assembly Line 1",
            Reading::TemperatureHumidity {
                temperature: 31.0,
                humidity: 50.0,
                limits: TemperatureHumidityLimits {
                    temperature_min: 15.0,
                    temperature_max: 30.0,
                    humidity_min: 30.0,
                    humidity_max: 70.0,
                },
            },
        ))
        .unwrap();

    assert!(recorded.is_out_of_spec());
    assert_eq!(monitor.statistics().out_of_spec_count, 1);
    assert_eq!(monitor.statistics().out_of_spec_percentage, 100.0);
}

#[test]
fn dust_at_class_limits_is_in_spec() {
    let directory = tempfile::tempdir().unwrap();
    let mut monitor = file_monitor(directory.path());

    let recorded = monitor
        .record(draft(
            1,
            "Clean Room A",
            Reading::DustinessIso6 {
                particles_0_5um: 10200.0,
                particles_5um: 2930.0,
                limits: ParticleLimits {
                    particles_0_5um_min: 0.0,
                    particles_0_5um_max: 10200.0,
                    particles_5um_min: 0.0,
                    particles_5um_max: 2930.0,
                },
            },
        ))
        .unwrap();

    assert!(!recorded.is_out_of_spec());
}

#[test]
fn history_shows_upward_torque() {
    let directory = tempfile::tempdir().unwrap();
    let mut monitor = file_monitor(directory.path());
    monitor.record(draft(1, "Station 3", torque(5.0))).unwrap();
    let newer = monitor.record(draft(2, "Station 3", torque(5.5))).unwrap();

    let entries = monitor.history(&HistoryFilter::default());
    assert_eq!(entries[0].measurement.id, newer.id);
    assert_eq!(entries[0].trend, Some(Direction::Up));
    assert_eq!(entries[1].trend, None);
}

#[test]
fn luminosity_rise_reads_as_worsening() {
    let directory = tempfile::tempdir().unwrap();
    let mut monitor = file_monitor(directory.path());
    for (day, value) in [(1, 400.0), (2, 400.0), (3, 600.0), (4, 600.0)] {
        monitor.record(draft(day, "Assembly Line 1", luminosity(value))).unwrap();
    }

    let statistics = monitor.statistics();
    let trend = statistics
        .recent_trends
        .iter()
        .find(|trend| trend.kind == MeasurementType::Luminosity)
        .unwrap();
    assert_eq!(trend.trend, Trend::Worsening);
    assert!((trend.change_percent - 50.0).abs() < 1e-9);
}

#[test]
fn empty_statistics_have_no_division_by_zero() {
    let directory = tempfile::tempdir().unwrap();
    let monitor = file_monitor(directory.path());
    let statistics = monitor.statistics();
    assert_eq!(statistics.total_measurements, 0);
    assert_eq!(statistics.out_of_spec_percentage, 0.0);
    assert!(statistics.recent_trends.is_empty());
    assert_eq!(monitor.dashboard().len(), 8);
}

#[test]
fn state_survives_restart_from_files() {
    let directory = tempfile::tempdir().unwrap();
    let id = {
        let mut monitor = file_monitor(directory.path());
        let recorded = monitor.record(draft(3, "Station 3", torque(5.2))).unwrap();
        monitor
            .update_limits(Limits::Torque(RangeLimits { min: 3.5, max: 6.5 }))
            .unwrap();
        monitor.edit(&recorded.id, draft(3, "Station 4", torque(5.3))).unwrap();
        recorded.id
    };

    let monitor = file_monitor(directory.path());
    let restored = monitor.store().get(&id).unwrap();
    assert_eq!(restored.location, "Station 4");
    assert_eq!(restored.reading.limits(), Limits::Torque(RangeLimits { min: 3.5, max: 6.5 }));

    let actions: Vec<AuditAction> = monitor.audit().entries().iter().map(|entry| entry.action).collect();
    assert_eq!(actions, vec![AuditAction::Create, AuditAction::Update, AuditAction::Update]);
}

#[test]
fn import_stops_at_malformed_record_and_keeps_earlier_ones() {
    let directory = tempfile::tempdir().unwrap();
    let mut monitor = file_monitor(directory.path());

    let mut records: Vec<serde_json::Value> = (1..=60)
        .map(|n| {
            json!({
                "type": "luminosity",
                "date": (at(1, 0) + Duration::minutes(n)).to_rfc3339(),
                "location": "Assembly Line 1",
                "luminosity": 600 + n,
                "limits": { "min": 500, "max": 1000 }
            })
        })
        .collect();
    records[55]["date"] = json!("");
    let document = json!({ "measurements": records }).to_string();

    let mut reports = Vec::new();
    match monitor.import_json(&document, |progress| reports.push(progress.imported)) {
        Err(Error::MalformedImport { index, .. }) => assert_eq!(index, 55),
        other => panic!("expected malformed import, got {:?}", other),
    }

    assert_eq!(monitor.store().len(), 55);
    assert_eq!(reports, vec![50]);
    let imports = monitor.audit().query(&AuditFilter {
        action: Some(AuditAction::Import),
        ..AuditFilter::default()
    });
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].metadata, Some(json!({ "count": 55, "failedIndex": 55 })));
}

#[test]
fn export_then_import_into_fresh_store() {
    let source_directory = tempfile::tempdir().unwrap();
    let mut source = file_monitor(source_directory.path());
    source.record(draft(1, "Assembly Line 1", luminosity(450.0))).unwrap();
    source.record(draft(2, "Station 3", torque(5.0))).unwrap();

    let mut buffer = Vec::new();
    assert_eq!(source.export_json(&mut buffer).unwrap(), 2);
    let exported: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
    assert_eq!(exported["statistics"]["outOfSpecCount"], json!(1));
    assert_eq!(exported["measurements"][0]["type"], json!("torque"));

    let target_directory = tempfile::tempdir().unwrap();
    let mut target = file_monitor(target_directory.path());
    let imported = target
        .import_json(std::str::from_utf8(&buffer).unwrap(), |_| {})
        .unwrap();
    assert_eq!(imported, 2);
    assert_eq!(target.statistics().out_of_spec_count, 1);

    let export_entries = source.audit().query(&AuditFilter {
        entity_type: Some(AuditEntity::Measurement),
        action: Some(AuditAction::Export),
        ..AuditFilter::default()
    });
    assert_eq!(export_entries.len(), 1);
}

#[test]
fn background_writer_reports_failures_as_notifications() {
    let directory = tempfile::tempdir().unwrap();
    let data = directory.path().join("data");
    let (notifier, notifications) = Notifier::channel();
    let storage: Arc<dyn Storage> = Arc::new(
        BackgroundStorage::spawn(Arc::new(FileStorage::open(&data).unwrap()), notifier.clone()).unwrap(),
    );
    let mut monitor = Monitor::open(storage, notifier, "admin").unwrap();

    std::fs::remove_dir_all(&data).unwrap();
    let recorded = monitor.record(draft(1, "Station 3", torque(5.0))).unwrap();
    assert_eq!(monitor.store().get(&recorded.id), Some(&recorded));
    drop(monitor);

    let levels: Vec<Level> = notifications.try_iter().map(|notification| notification.level).collect();
    assert!(levels.contains(&Level::Success));
    assert!(levels.contains(&Level::Error));
}

#[test]
fn storage_stack_from_configuration() {
    let directory = tempfile::tempdir().unwrap();
    let yaml = format!(
        "actor: inspector\nstorage:\n  data_dir: {}\n  background_writer: true\n",
        directory.path().display()
    );
    let configuration = Configuration::from_yaml(&yaml).unwrap();
    let storage = storage::open(&configuration, &Notifier::silent()).unwrap();

    {
        let mut monitor = Monitor::open(Arc::clone(&storage), Notifier::silent(), configuration.actor.as_str()).unwrap();
        monitor.record(draft(1, "Station 3", torque(5.0))).unwrap();
        assert!(monitor.subscribe(Box::new(|_: Vec<wpmon::record::Measurement>| {})).unwrap().is_none());
    }

    assert_eq!(storage.load_measurements().unwrap().unwrap().len(), 1);
    assert!(directory.path().join("workplace-measurements.json").exists());
    assert_eq!(storage.load_audit().unwrap()[0].actor, "inspector");
}
