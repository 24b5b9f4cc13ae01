//! Persistence of measurements, limits, specifications and the audit log.
//!
//! The application only depends on the [`Storage`] trait. Implementations are the local file
//! store ([`crate::local::FileStorage`]), the remote document store on postgres
//! ([`crate::database::DatabaseStorage`]), the mirror combining both and the background writer
//! ([`crate::writer::BackgroundStorage`]) that takes writes off the caller's thread.
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::audit::AuditEntry;
use crate::config::Configuration;
use crate::database::DatabaseStorage;
use crate::error::{Error, Result};
use crate::limits::LimitDefaults;
use crate::local::FileStorage;
use crate::notify::Notifier;
use crate::record::Measurement;
use crate::specification::IsoSpecification;
use crate::writer::BackgroundStorage;

/// Document name of the measurement list.
pub const MEASUREMENTS: &str = "workplace-measurements";
/// Document name of the limit defaults.
pub const LIMITS: &str = "measurement-limits";
/// Document name of the ISO specifications.
pub const SPECIFICATIONS: &str = "iso-specifications";
/// Name of the append only audit log.
pub const AUDIT_LOG: &str = "audit-log";

/// Invoked with the complete measurement list whenever a remote copy changes.
pub type ChangeCallback = Box<dyn Fn(Vec<Measurement>) + Send + 'static>;

/// Persistence collaborator.
///
/// `load_*` return `Ok(None)` when nothing was stored yet, so callers fall back to built-in
/// defaults.
pub trait Storage: Send + Sync {
    fn load_measurements(&self) -> Result<Option<Vec<Measurement>>>;
    fn save_measurements(&self, measurements: &[Measurement]) -> Result<()>;

    fn load_limits(&self) -> Result<Option<LimitDefaults>>;
    fn save_limits(&self, limits: &LimitDefaults) -> Result<()>;

    fn load_specifications(&self) -> Result<Option<Vec<IsoSpecification>>>;
    fn save_specifications(&self, specifications: &[IsoSpecification]) -> Result<()>;

    fn load_audit(&self) -> Result<Vec<AuditEntry>>;
    fn append_audit(&self, entry: &AuditEntry) -> Result<()>;

    /// Follow changes made by other sessions. Stores without a remote copy return `Ok(None)`.
    fn subscribe(&self, _callback: ChangeCallback) -> Result<Option<Subscription>> {
        Ok(None)
    }
}

/// Handle of a running change subscription. Dropping it stops the watcher thread.
pub struct Subscription {
    finish: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(finish: Arc<AtomicBool>, handle: JoinHandle<()>) -> Self {
        Subscription {
            finish,
            handle: Some(handle),
        }
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.finish.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!(target: "wpmon::storage", "Could not join the subscription thread!");
            }
        }
    }
}

#[derive(Default)]
struct MemoryState {
    measurements: Option<Vec<Measurement>>,
    limits: Option<LimitDefaults>,
    specifications: Option<Vec<IsoSpecification>>,
    audit: Vec<AuditEntry>,
}

#[derive(Default)]
/// Volatile storage. Writes can be made to fail to exercise error reporting.
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
    failing: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage::default()
    }

    pub fn with_measurements(measurements: Vec<Measurement>) -> Self {
        let storage = MemoryStorage::default();
        storage.state().measurements = Some(measurements);
        storage
    }

    /// Makes every following write fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write<F: FnOnce(&mut MemoryState)>(&self, apply: F) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Storage(String::from("memory storage is set to fail")));
        }
        apply(&mut self.state());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn load_measurements(&self) -> Result<Option<Vec<Measurement>>> {
        Ok(self.state().measurements.clone())
    }

    fn save_measurements(&self, measurements: &[Measurement]) -> Result<()> {
        self.write(|state| state.measurements = Some(measurements.to_vec()))
    }

    fn load_limits(&self) -> Result<Option<LimitDefaults>> {
        Ok(self.state().limits)
    }

    fn save_limits(&self, limits: &LimitDefaults) -> Result<()> {
        self.write(|state| state.limits = Some(*limits))
    }

    fn load_specifications(&self) -> Result<Option<Vec<IsoSpecification>>> {
        Ok(self.state().specifications.clone())
    }

    fn save_specifications(&self, specifications: &[IsoSpecification]) -> Result<()> {
        self.write(|state| state.specifications = Some(specifications.to_vec()))
    }

    fn load_audit(&self) -> Result<Vec<AuditEntry>> {
        Ok(self.state().audit.clone())
    }

    fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.write(|state| state.audit.push(entry.clone()))
    }
}

/// Local storage with an optional remote copy.
///
/// Loads prefer the remote copy and write it through to the local one. Writes go to the local
/// store first, then to the remote one. The audit logs of both are merged by entry id, entries
/// missing on one side are appended to it.
pub struct MirroredStorage {
    local: Arc<dyn Storage>,
    remote: Option<Arc<dyn Storage>>,
}

impl MirroredStorage {
    pub fn new(local: Arc<dyn Storage>, remote: Option<Arc<dyn Storage>>) -> Self {
        MirroredStorage { local, remote }
    }

    fn load_with<T, L, S>(&self, name: &str, load: L, save: S) -> Result<Option<T>>
    where
        L: Fn(&dyn Storage) -> Result<Option<T>>,
        S: Fn(&dyn Storage, &T) -> Result<()>,
    {
        if let Some(remote) = &self.remote {
            match load(remote.as_ref()) {
                Ok(Some(value)) => {
                    if let Err(err) = save(self.local.as_ref(), &value) {
                        log::warn!(target: "wpmon::storage", "Could not sync '{}' from remote: '{}'", name, err);
                    } else {
                        log::debug!(target: "wpmon::storage", "Synced '{}' from remote", name);
                    }
                    return Ok(Some(value));
                }
                Ok(None) => {}
                Err(err) => {
                    log::warn!(target: "wpmon::storage", "Remote load of '{}' failed, using local copy: '{}'", name, err);
                }
            }
        }
        load(self.local.as_ref())
    }

    fn save_with<F>(&self, save: F) -> Result<()>
    where
        F: Fn(&dyn Storage) -> Result<()>,
    {
        save(self.local.as_ref())?;
        if let Some(remote) = &self.remote {
            save(remote.as_ref())?;
        }
        Ok(())
    }
}

impl Storage for MirroredStorage {
    fn load_measurements(&self) -> Result<Option<Vec<Measurement>>> {
        self.load_with(
            MEASUREMENTS,
            |storage| storage.load_measurements(),
            |storage, value| storage.save_measurements(value),
        )
    }

    fn save_measurements(&self, measurements: &[Measurement]) -> Result<()> {
        self.save_with(|storage| storage.save_measurements(measurements))
    }

    fn load_limits(&self) -> Result<Option<LimitDefaults>> {
        self.load_with(
            LIMITS,
            |storage| storage.load_limits(),
            |storage, value| storage.save_limits(value),
        )
    }

    fn save_limits(&self, limits: &LimitDefaults) -> Result<()> {
        self.save_with(|storage| storage.save_limits(limits))
    }

    fn load_specifications(&self) -> Result<Option<Vec<IsoSpecification>>> {
        self.load_with(
            SPECIFICATIONS,
            |storage| storage.load_specifications(),
            |storage, value| storage.save_specifications(value),
        )
    }

    fn save_specifications(&self, specifications: &[IsoSpecification]) -> Result<()> {
        self.save_with(|storage| storage.save_specifications(specifications))
    }

    fn load_audit(&self) -> Result<Vec<AuditEntry>> {
        let local = self.local.load_audit()?;
        let (remote, remote_entries) = match &self.remote {
            Some(remote) => match remote.load_audit() {
                Ok(entries) => (remote, entries),
                Err(err) => {
                    log::warn!(target: "wpmon::storage", "Remote load of '{}' failed, using local copy: '{}'", AUDIT_LOG, err);
                    return Ok(local);
                }
            },
            None => return Ok(local),
        };

        let local_ids: HashSet<&str> = local.iter().map(|entry| entry.id.as_str()).collect();
        let remote_ids: HashSet<&str> = remote_entries.iter().map(|entry| entry.id.as_str()).collect();

        let mut merged: Vec<AuditEntry> = local.clone();
        for entry in remote_entries.iter().filter(|entry| !local_ids.contains(entry.id.as_str())) {
            if let Err(err) = self.local.append_audit(entry) {
                log::warn!(target: "wpmon::storage", "Could not sync audit entry '{}' from remote: '{}'", entry.id, err);
            }
            merged.push(entry.clone());
        }
        for entry in local.iter().filter(|entry| !remote_ids.contains(entry.id.as_str())) {
            if let Err(err) = remote.append_audit(entry) {
                log::warn!(target: "wpmon::storage", "Could not push audit entry '{}' to remote: '{}'", entry.id, err);
            }
        }

        merged.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(merged)
    }

    fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.save_with(|storage| storage.append_audit(entry))
    }

    fn subscribe(&self, callback: ChangeCallback) -> Result<Option<Subscription>> {
        match &self.remote {
            Some(remote) => remote.subscribe(callback),
            None => Ok(None),
        }
    }
}

/// Builds the storage stack described by `configuration`.
pub fn open(configuration: &Configuration, notifier: &Notifier) -> Result<Arc<dyn Storage>> {
    let local: Arc<dyn Storage> = Arc::new(FileStorage::open(&configuration.storage.data_dir)?);

    let remote: Option<Arc<dyn Storage>> = match &configuration.remote {
        Some(remote) => {
            let database = DatabaseStorage::connect(remote.database.clone(), remote.poll_interval())?;
            log::info!(target: "wpmon::storage", "Remote document store at '{}' attached", remote.database.hostname);
            Some(Arc::new(database))
        }
        None => None,
    };

    let mirrored: Arc<dyn Storage> = Arc::new(MirroredStorage::new(local, remote));
    if configuration.storage.background_writer {
        Ok(Arc::new(BackgroundStorage::spawn(mirrored, notifier.clone())?))
    } else {
        Ok(mirrored)
    }
}
