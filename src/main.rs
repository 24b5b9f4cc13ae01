use std::fs::{self, File};
use std::io::BufWriter;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time;

use chrono::NaiveDate;
use clap::{App, ArgMatches};

use wpmon::audit::{self, AuditFilter};
use wpmon::config::Configuration;
use wpmon::history::HistoryFilter;
use wpmon::monitor::Monitor;
use wpmon::notify::{Level, Notification, Notifier};
use wpmon::record::{Limits, Measurement, NewMeasurement};
use wpmon::stats::Direction;
use wpmon::{storage, Error, Result};

fn argument_error(field: &'static str, reason: String) -> Error {
    Error::Validation { field, reason }
}

fn parse_date(matches: &ArgMatches, name: &'static str) -> Result<Option<NaiveDate>> {
    match matches.value_of(name) {
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(Some)
            .map_err(|err| argument_error(name, format!("'{}' is not a YYYY-MM-DD date: {}", value, err))),
        None => Ok(None),
    }
}

fn parse_number<T: std::str::FromStr>(matches: &ArgMatches, name: &'static str) -> Result<Option<T>> {
    match matches.value_of(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| argument_error(name, format!("'{}' is not a number", value))),
        None => Ok(None),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn print_notifications(notifications: &Receiver<Notification>) {
    for notification in notifications.try_iter() {
        let level = match notification.level {
            Level::Success => "ok",
            Level::Warning => "warning",
            Level::Error => "error",
        };
        println!("[{}] {}", level, notification.message);
    }
}

fn status(monitor: &Monitor) {
    for status in monitor.dashboard() {
        match &status.latest {
            Some(latest) => println!(
                "{:<22} {:>5}  {:<28} {:<24} {}",
                status.kind,
                status.count,
                latest.reading.value_label(),
                latest.location,
                if status.is_out_of_spec { "OUT OF SPEC" } else { "ok" }
            ),
            None => println!("{:<22} {:>5}  no data", status.kind, status.count),
        }
    }
}

fn history(monitor: &Monitor, matches: &ArgMatches) -> Result<()> {
    let filter = HistoryFilter {
        kind: matches.value_of("type").map(str::parse).transpose()?,
        location: matches.value_of("location").map(String::from),
        notes: matches.value_of("notes").map(String::from),
        date_from: parse_date(matches, "from")?,
        date_to: parse_date(matches, "to")?,
        year: parse_number(matches, "year")?,
        month: parse_number(matches, "month")?,
    };

    for entry in monitor.history(&filter) {
        let arrow = match entry.trend {
            Some(Direction::Up) => "↑",
            Some(Direction::Down) => "↓",
            Some(Direction::Stable) => "→",
            None => " ",
        };
        let measurement = entry.measurement;
        println!(
            "{} {} {:<22} {:<24} {} {}{}",
            measurement.id,
            measurement.date.format("%Y-%m-%d %H:%M"),
            measurement.kind(),
            measurement.location,
            arrow,
            measurement.reading.value_label(),
            if measurement.is_out_of_spec() { "  OUT OF SPEC" } else { "" }
        );
    }
    Ok(())
}

fn audit_log(monitor: &Monitor, matches: &ArgMatches) -> Result<()> {
    let filter = AuditFilter {
        actor: matches.value_of("actor").map(String::from),
        action: matches.value_of("action").map(str::parse).transpose()?,
        entity_type: matches.value_of("entity").map(str::parse).transpose()?,
        search: matches.value_of("search").map(String::from),
        ..AuditFilter::default()
    }
    .days(parse_date(matches, "from")?, parse_date(matches, "to")?);
    let page = parse_number(matches, "page")?.unwrap_or(1);
    let page_size = parse_number(matches, "page-size")?.unwrap_or(50);

    let entries = monitor.audit().query(&filter);
    for entry in audit::paginate(&entries, page, page_size) {
        println!(
            "{} {:<12} {:<7} {:<13} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.actor,
            entry.action,
            entry.entity_type,
            entry.entity_id.as_deref().unwrap_or("-")
        );
        for change in entry.changes.iter().flatten() {
            println!("    {}: {} -> {}", change.field, change.old_value, change.new_value);
        }
    }
    Ok(())
}

fn watch(monitor: &mut Monitor, notifications: &Receiver<Notification>) -> Result<()> {
    let (tx, rx) = mpsc::channel::<Vec<Measurement>>();
    let subscription = match monitor.subscribe(Box::new(move |measurements: Vec<Measurement>| {
        if tx.send(measurements).is_err() {
            log::warn!(target: "wpmon", "Dropped remote change, watcher has stopped");
        }
    }))? {
        Some(subscription) => subscription,
        None => {
            return Err(Error::Config(String::from("watch requires a remote store")));
        }
    };

    let terminate_program = Arc::new(AtomicBool::new(false));
    let terminate_handler = Arc::clone(&terminate_program);
    ctrlc::set_handler(move || {
        log::info!(target: "wpmon", "Termination signal received!");
        terminate_handler.store(true, Ordering::SeqCst);
    })
    .map_err(|err| Error::Config(format!("Could not set the termination handler: {}", err)))?;

    log::info!(target: "wpmon", "Watching for remote changes");
    let timeout = time::Duration::from_millis(100);
    while !terminate_program.load(Ordering::SeqCst) {
        match rx.recv_timeout(timeout) {
            Ok(measurements) => {
                monitor.apply_remote(measurements);
                let statistics = monitor.statistics();
                println!(
                    "{} measurements, {} out of spec ({:.1} %)",
                    statistics.total_measurements,
                    statistics.out_of_spec_count,
                    statistics.out_of_spec_percentage
                );
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        print_notifications(notifications);
    }

    subscription.unsubscribe();
    Ok(())
}

fn run(monitor: &mut Monitor, matches: &ArgMatches, notifications: &Receiver<Notification>) -> Result<()> {
    match matches.subcommand() {
        ("status", Some(_)) => status(monitor),
        ("summary", Some(_)) => println!("{}", serde_json::to_string_pretty(&monitor.statistics())?),
        ("history", Some(sub)) => history(monitor, sub)?,
        ("add", Some(sub)) => {
            let draft: NewMeasurement = read_json(sub.value_of("FILE").unwrap_or_default())?;
            let measurement = monitor.record(draft)?;
            println!("{}", measurement.id);
        }
        ("edit", Some(sub)) => {
            let id = sub.value_of("ID").unwrap_or_default();
            let draft: NewMeasurement = read_json(sub.value_of("FILE").unwrap_or_default())?;
            if monitor.edit(id, draft)?.is_none() {
                log::warn!(target: "wpmon", "No measurement with id '{}'", id);
            }
        }
        ("delete", Some(sub)) => {
            let id = sub.value_of("ID").unwrap_or_default();
            if monitor.delete(id).is_none() {
                log::warn!(target: "wpmon", "No measurement with id '{}'", id);
            }
        }
        ("import", Some(sub)) => {
            let content = fs::read_to_string(sub.value_of("FILE").unwrap_or_default())?;
            monitor.import_json(&content, |progress| {
                println!("{} / {}", progress.imported, progress.total);
            })?;
        }
        ("export", Some(sub)) => {
            let file = File::create(sub.value_of("FILE").unwrap_or_default())?;
            monitor.export_json(BufWriter::new(file))?;
        }
        ("limits", Some(sub)) => {
            if let Some(path) = sub.value_of("set") {
                let limits: Limits = read_json(path)?;
                monitor.update_limits(limits)?;
            }
            println!("{}", serde_json::to_string_pretty(monitor.limits().as_ref())?);
        }
        ("specs", Some(_)) => {
            for specification in monitor.specifications().all().iter() {
                println!(
                    "{:<22} {:<16} {}\n    {}\n    {}",
                    specification.measurement_type,
                    specification.iso_standard,
                    specification.standard_title,
                    specification.description,
                    specification.requirements
                );
            }
        }
        ("audit", Some(sub)) => audit_log(monitor, sub)?,
        ("watch", Some(_)) => watch(monitor, notifications)?,
        _ => {}
    }
    Ok(())
}

fn main() {
    let cli_yaml = clap::load_yaml!("cli.yml");
    let matches = App::from(cli_yaml).get_matches();

    let log_configuration = matches.value_of("log-config").unwrap_or("resources/log.yml");
    match log4rs::init_file(log_configuration, Default::default()) {
        Ok(_) => {}
        Err(err) => {
            eprintln!("Could not create logger from yaml configuration: {}", err);
            exit(-100);
        }
    };

    let configuration_path = matches.value_of("config").unwrap_or("resources/wpmon.yml");
    let mut configuration = match Configuration::from_file(configuration_path) {
        Ok(configuration) => configuration,
        Err(err) => {
            log::error!(target: "wpmon", "Cannot read the configuration \'{}\': \'{}\'", configuration_path, err);
            exit(101);
        }
    };
    if let Some(actor) = matches.value_of("actor") {
        configuration.actor = actor.to_string();
    }

    let (notifier, notifications) = Notifier::channel();

    let storage = match storage::open(&configuration, &notifier) {
        Ok(storage) => storage,
        Err(err) => {
            log::error!(target: "wpmon", "Cannot open the storage: \'{}\'", err);
            exit(201);
        }
    };

    let mut monitor = match Monitor::open(storage, notifier, configuration.actor.as_str()) {
        Ok(monitor) => monitor,
        Err(err) => {
            log::error!(target: "wpmon", "Cannot load the stored data: \'{}\'", err);
            exit(202);
        }
    };

    let result = run(&mut monitor, &matches, &notifications);

    // Joins the background writer, its failures arrive as notifications.
    drop(monitor);
    print_notifications(&notifications);

    match result {
        Ok(_) => {
            log::info!(target: "wpmon", "Exiting");
            exit(0);
        }
        Err(err) => {
            log::error!(target: "wpmon", "Command failed: \'{}\'", err);
            exit(1);
        }
    }
}
