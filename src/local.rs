//! Local file storage. Every document is a JSON file in the data directory, the audit log is a
//! JSON lines file that is only ever appended to.
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::audit::AuditEntry;
use crate::error::Result;
use crate::limits::LimitDefaults;
use crate::record::Measurement;
use crate::specification::IsoSpecification;
use crate::storage::{Storage, AUDIT_LOG, LIMITS, MEASUREMENTS, SPECIFICATIONS};

pub struct FileStorage {
    directory: PathBuf,
    // Serializes writers of this process.
    lock: Mutex<()>,
}

impl FileStorage {
    /// Opens the store in `directory`, creating the directory if needed.
    pub fn open(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;
        log::debug!(target: "wpmon::storage", "Using data directory '{}'", directory.display());
        Ok(FileStorage {
            directory,
            lock: Mutex::new(()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn document_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{}.json", name))
    }

    fn read_document<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match fs::read_to_string(self.document_path(name)) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write_document<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let content = serde_json::to_vec_pretty(value)?;
        let path = self.document_path(name);
        let staging = path.with_extension("json.tmp");

        let _guard = self.lock.lock();
        fs::write(&staging, content)?;
        fs::rename(&staging, &path)?;
        log::trace!(target: "wpmon::storage", "Wrote '{}'", path.display());
        Ok(())
    }

    fn audit_path(&self) -> PathBuf {
        self.directory.join(format!("{}.jsonl", AUDIT_LOG))
    }
}

impl Storage for FileStorage {
    fn load_measurements(&self) -> Result<Option<Vec<Measurement>>> {
        self.read_document(MEASUREMENTS)
    }

    fn save_measurements(&self, measurements: &[Measurement]) -> Result<()> {
        self.write_document(MEASUREMENTS, measurements)
    }

    fn load_limits(&self) -> Result<Option<LimitDefaults>> {
        self.read_document(LIMITS)
    }

    fn save_limits(&self, limits: &LimitDefaults) -> Result<()> {
        self.write_document(LIMITS, limits)
    }

    fn load_specifications(&self) -> Result<Option<Vec<IsoSpecification>>> {
        self.read_document(SPECIFICATIONS)
    }

    fn save_specifications(&self, specifications: &[IsoSpecification]) -> Result<()> {
        self.write_document(SPECIFICATIONS, specifications)
    }

    fn load_audit(&self) -> Result<Vec<AuditEntry>> {
        let file = match fs::File::open(self.audit_path()) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }

    fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        let _guard = self.lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.audit_path())?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}
