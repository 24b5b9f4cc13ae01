//! Background writer that takes persistence off the caller's thread.
//!
//! Writes are queued on a channel and applied in order by a dedicated `storage` thread. Failures
//! are logged and reported through the [`Notifier`]; callers never wait for a write.
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time;

use crate::audit::AuditEntry;
use crate::error::{Error, Result};
use crate::limits::LimitDefaults;
use crate::notify::Notifier;
use crate::record::Measurement;
use crate::specification::IsoSpecification;
use crate::storage::{ChangeCallback, Storage, Subscription};

enum WriteRequest {
    Measurements(Vec<Measurement>),
    Limits(LimitDefaults),
    Specifications(Vec<IsoSpecification>),
    Audit(AuditEntry),
    /// Answered once every request queued before it has been applied.
    Flush(Sender<()>),
}

impl WriteRequest {
    fn describe(&self) -> &'static str {
        match self {
            WriteRequest::Measurements(_) => "measurements",
            WriteRequest::Limits(_) => "limits",
            WriteRequest::Specifications(_) => "specifications",
            WriteRequest::Audit(_) => "audit entry",
            WriteRequest::Flush(_) => "flush",
        }
    }
}

fn apply(storage: &dyn Storage, request: WriteRequest) -> Result<()> {
    match request {
        WriteRequest::Measurements(measurements) => storage.save_measurements(&measurements),
        WriteRequest::Limits(limits) => storage.save_limits(&limits),
        WriteRequest::Specifications(specifications) => storage.save_specifications(&specifications),
        WriteRequest::Audit(entry) => storage.append_audit(&entry),
        WriteRequest::Flush(done) => {
            // The flushing side may have given up waiting.
            let _ = done.send(());
            Ok(())
        }
    }
}

/// Thread function of the background writer.
///
/// Runs until every sender has been dropped and the queue is drained.
fn writer_thread(rx: mpsc::Receiver<WriteRequest>, storage: Arc<dyn Storage>, notifier: Notifier) {
    let timeout = time::Duration::from_millis(100);
    loop {
        let request = match rx.recv_timeout(timeout) {
            Ok(request) => request,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let description = request.describe();
        match apply(storage.as_ref(), request) {
            Ok(_) => log::trace!(target: "wpmon::writer", "Wrote {}", description),
            Err(err) => {
                log::error!(target: "wpmon::writer", "Could not write {}: \'{}\'", description, err);
                notifier.error(format!("Could not save {}: {}", description, err));
            }
        }
    }
    log::debug!(target: "wpmon::writer", "Storage thread finished");
}

/// [`Storage`] decorator whose writes return immediately.
///
/// Loads flush the queue first, so a load always sees earlier writes.
pub struct BackgroundStorage {
    inner: Arc<dyn Storage>,
    tx: Mutex<Option<Sender<WriteRequest>>>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundStorage {
    pub fn spawn(inner: Arc<dyn Storage>, notifier: Notifier) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let thread_storage = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("storage".to_string())
            .spawn(move || writer_thread(rx, thread_storage, notifier))?;

        Ok(BackgroundStorage {
            inner,
            tx: Mutex::new(Some(tx)),
            handle: Some(handle),
        })
    }

    fn send(&self, request: WriteRequest) -> Result<()> {
        let guard = self
            .tx
            .lock()
            .map_err(|_| Error::Storage(String::from("writer queue lock poisoned")))?;
        match guard.as_ref() {
            Some(tx) => tx
                .send(request)
                .map_err(|_| Error::Storage(String::from("storage thread has stopped"))),
            None => Err(Error::Storage(String::from("storage thread has stopped"))),
        }
    }

    /// Blocks until every write queued so far has been applied.
    pub fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = mpsc::channel();
        self.send(WriteRequest::Flush(done_tx))?;
        done_rx
            .recv()
            .map_err(|_| Error::Storage(String::from("storage thread has stopped")))
    }
}

impl Drop for BackgroundStorage {
    fn drop(&mut self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(_) => log::debug!(target: "wpmon::writer", "Joined storage thread!"),
                Err(_) => log::error!(target: "wpmon::writer", "Could not join the storage thread!"),
            }
        }
    }
}

impl Storage for BackgroundStorage {
    fn load_measurements(&self) -> Result<Option<Vec<Measurement>>> {
        self.flush()?;
        self.inner.load_measurements()
    }

    fn save_measurements(&self, measurements: &[Measurement]) -> Result<()> {
        self.send(WriteRequest::Measurements(measurements.to_vec()))
    }

    fn load_limits(&self) -> Result<Option<LimitDefaults>> {
        self.flush()?;
        self.inner.load_limits()
    }

    fn save_limits(&self, limits: &LimitDefaults) -> Result<()> {
        self.send(WriteRequest::Limits(*limits))
    }

    fn load_specifications(&self) -> Result<Option<Vec<IsoSpecification>>> {
        self.flush()?;
        self.inner.load_specifications()
    }

    fn save_specifications(&self, specifications: &[IsoSpecification]) -> Result<()> {
        self.send(WriteRequest::Specifications(specifications.to_vec()))
    }

    fn load_audit(&self) -> Result<Vec<AuditEntry>> {
        self.flush()?;
        self.inner.load_audit()
    }

    fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.send(WriteRequest::Audit(entry.clone()))
    }

    fn subscribe(&self, callback: ChangeCallback) -> Result<Option<Subscription>> {
        self.inner.subscribe(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Level;
    use crate::storage::MemoryStorage;

    #[test]
    fn loads_see_queued_writes() {
        let memory = Arc::new(MemoryStorage::new());
        let storage = BackgroundStorage::spawn(memory.clone(), Notifier::silent()).unwrap();

        let mut limits = LimitDefaults::default();
        limits.torque.max = 7.0;
        storage.save_limits(&limits).unwrap();
        storage.save_measurements(&[]).unwrap();

        assert_eq!(storage.load_limits().unwrap(), Some(limits));
        assert_eq!(memory.writes(), 2);
    }

    #[test]
    fn failed_writes_are_notified() {
        let memory = Arc::new(MemoryStorage::new());
        memory.set_failing(true);
        let (notifier, rx) = Notifier::channel();
        let storage = BackgroundStorage::spawn(memory, notifier).unwrap();

        assert!(storage.save_measurements(&[]).is_ok());
        storage.flush().unwrap();

        let notification = rx.try_recv().unwrap();
        assert_eq!(notification.level, Level::Error);
    }

    #[test]
    fn drop_drains_the_queue() {
        let memory = Arc::new(MemoryStorage::new());
        {
            let storage = BackgroundStorage::spawn(memory.clone(), Notifier::silent()).unwrap();
            for _ in 0..10 {
                storage.save_measurements(&[]).unwrap();
            }
        }
        assert_eq!(memory.writes(), 10);
    }
}
