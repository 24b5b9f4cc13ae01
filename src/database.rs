//! Remote document store on a postgres database.
//!
//! Every collection is stored as one JSON document in the `wpmon_documents` table, the audit log
//! as one row per entry in `wpmon_audit_log`. Other sessions are followed by polling the
//! modification time of the measurement document.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use openssl::ssl::{SslConnector, SslFiletype, SslMethod, SslVerifyMode};
use postgres::Client;
use postgres_openssl::MakeTlsConnector;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::AuditEntry;
use crate::error::{Error, Result};
use crate::limits::LimitDefaults;
use crate::record::Measurement;
use crate::specification::IsoSpecification;
use crate::storage::{self, ChangeCallback, Storage, Subscription};

static SQL_CREATE_SCHEMA: &'static str = include_str!("sql/create_schema.sql");

static SQL_SELECT_DOCUMENT: &'static str = include_str!("sql/select_document.sql");
static SQL_SELECT_DOCUMENT_VERSION: &'static str = include_str!("sql/select_document_version.sql");
static SQL_UPSERT_DOCUMENT: &'static str = include_str!("sql/upsert_document.sql");

static SQL_SELECT_AUDIT: &'static str = include_str!("sql/select_audit.sql");
static SQL_INSERT_AUDIT: &'static str = include_str!("sql/insert_audit.sql");

/// Granularity at which the subscription thread checks its finish flag.
const POLL_TICK: Duration = Duration::from_millis(100);

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Struct modeling the parameters required for a database connection.
///
/// This includes SSL/TLS encryption.
pub struct DatabaseParameters
{
    /// The hostname of the database server.
    pub hostname: String,
    /// The port for the database server.
    pub port: u32,
    /// The username to connect as.
    pub username: String,
    /// The password to connect with.
    pub password: String,
    /// The database to open on the server.
    pub database: String,
    /// Flag to enable tls for the database server connection.
    pub tls_enable: bool,
    /// Parameters for the tls connection to the database server.
    pub tls_params: Option<DatabaseTlsParameters>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Struct for the parameters required for a tls connection to the database.
pub struct DatabaseTlsParameters {
    /// The path to the server certificate for TLS encryption.
    pub server_ca_path: String,
    /// The path to the client certificate for TLS encryption.
    pub client_cert_path: String,
    /// The path to the client key for TLS encryption.
    pub client_key_path: String,
}

fn connection_string(parameters: &DatabaseParameters) -> String {
    format!("user={} password={} host={} port={} dbname={} application_name=wpmon",
            parameters.username,
            parameters.password,
            parameters.hostname,
            parameters.port,
            parameters.database)
}

/// Opens a new connection to the database server.
///
/// # Errors
///
/// * TLS is enabled without TLS parameters.
///
/// * The files for the TLS connection cannot be read.
///
/// * The connection cannot be established or the user is not authorized for the database.
///
fn connect_client(parameters: &DatabaseParameters) -> Result<Client> {
    let connection_string = connection_string(parameters);
    if !parameters.tls_enable {
        return Ok(Client::connect(connection_string.as_str(), postgres::NoTls)?);
    }

    let tls_params = parameters.tls_params.as_ref().ok_or_else(|| {
        Error::Config(String::from("TLS enabled but no TLS parameters specified"))
    })?;

    let mut ssl_connection_builder = SslConnector::builder(SslMethod::tls())?;
    ssl_connection_builder.set_verify(SslVerifyMode::NONE);
    ssl_connection_builder.set_ca_file(&tls_params.server_ca_path)?;
    ssl_connection_builder.set_certificate_file(&tls_params.client_cert_path, SslFiletype::PEM)?;
    ssl_connection_builder.set_private_key_file(&tls_params.client_key_path, SslFiletype::PEM)?;

    let tls_connector = MakeTlsConnector::new(ssl_connection_builder.build());
    Ok(Client::connect(connection_string.as_str(), tls_connector)?)
}

fn document_version(client: &mut Client, collection: &str) -> Result<Option<DateTime<Utc>>> {
    match client.query_opt(SQL_SELECT_DOCUMENT_VERSION, &[&collection])? {
        Some(row) => Ok(Some(row.try_get("updated_at")?)),
        None => Ok(None),
    }
}

fn load_document<T: DeserializeOwned>(client: &mut Client, collection: &str) -> Result<Option<T>> {
    match client.query_opt(SQL_SELECT_DOCUMENT, &[&collection])? {
        Some(row) => {
            let content: Value = row.try_get("content")?;
            Ok(Some(serde_json::from_value(content)?))
        }
        None => Ok(None),
    }
}

/// Outcome of one poll of the measurement document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Unchanged,
    /// The new version was written by this session.
    OwnWrite,
    Changed,
}

fn poll_outcome(
    version: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    own_version: Option<DateTime<Utc>>,
) -> PollOutcome {
    if version.is_none() || version == last_seen {
        PollOutcome::Unchanged
    } else if version == own_version {
        PollOutcome::OwnWrite
    } else {
        PollOutcome::Changed
    }
}

pub struct DatabaseStorage {
    parameters: DatabaseParameters,
    client: Mutex<Client>,
    poll_interval: Duration,
    /// Version of the measurement document last written by this session.
    own_version: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl DatabaseStorage {
    /// Connects to the database and creates the tables if they do not exist yet.
    pub fn connect(parameters: DatabaseParameters, poll_interval: Duration) -> Result<Self> {
        let mut client = connect_client(&parameters)?;
        client.batch_execute(SQL_CREATE_SCHEMA)?;
        log::info!(target: "wpmon::db", "Database connection established!");
        Ok(DatabaseStorage {
            parameters,
            client: Mutex::new(client),
            poll_interval,
            own_version: Arc::new(Mutex::new(None)),
        })
    }

    fn client(&self) -> Result<MutexGuard<'_, Client>> {
        self.client
            .lock()
            .map_err(|_| Error::Storage(String::from("database connection lock poisoned")))
    }

    fn load<T: DeserializeOwned>(&self, collection: &str) -> Result<Option<T>> {
        load_document(&mut *self.client()?, collection)
    }

    /// Stores `document` and returns its new version.
    fn save<T: Serialize + ?Sized>(&self, collection: &str, document: &T) -> Result<DateTime<Utc>> {
        let content = serde_json::to_value(document)?;
        let row = self.client()?.query_one(SQL_UPSERT_DOCUMENT, &[&collection, &content])?;
        log::debug!(target: "wpmon::db", "Stored document '{}'", collection);
        Ok(row.try_get("updated_at")?)
    }
}

impl Storage for DatabaseStorage {
    fn load_measurements(&self) -> Result<Option<Vec<Measurement>>> {
        self.load(storage::MEASUREMENTS)
    }

    fn save_measurements(&self, measurements: &[Measurement]) -> Result<()> {
        let version = self.save(storage::MEASUREMENTS, measurements)?;
        if let Ok(mut own_version) = self.own_version.lock() {
            *own_version = Some(version);
        }
        Ok(())
    }

    fn load_limits(&self) -> Result<Option<LimitDefaults>> {
        self.load(storage::LIMITS)
    }

    fn save_limits(&self, limits: &LimitDefaults) -> Result<()> {
        self.save(storage::LIMITS, limits).map(|_| ())
    }

    fn load_specifications(&self) -> Result<Option<Vec<IsoSpecification>>> {
        self.load(storage::SPECIFICATIONS)
    }

    fn save_specifications(&self, specifications: &[IsoSpecification]) -> Result<()> {
        self.save(storage::SPECIFICATIONS, specifications).map(|_| ())
    }

    fn load_audit(&self) -> Result<Vec<AuditEntry>> {
        let rows = self.client()?.query(SQL_SELECT_AUDIT, &[])?;
        rows.iter()
            .map(|row| -> Result<AuditEntry> {
                let entry: Value = row.try_get("entry")?;
                Ok(serde_json::from_value(entry)?)
            })
            .collect()
    }

    fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let content = serde_json::to_value(entry)?;
        self.client()?
            .execute(SQL_INSERT_AUDIT, &[&entry.id, &entry.timestamp, &content])?;
        Ok(())
    }

    /// Polls the measurement document on a dedicated connection and calls `callback` with the
    /// new list whenever its modification time changes. Versions written by this session are
    /// skipped.
    fn subscribe(&self, callback: ChangeCallback) -> Result<Option<Subscription>> {
        let mut client = connect_client(&self.parameters)?;
        let mut last_seen = document_version(&mut client, storage::MEASUREMENTS)?;
        let poll_interval = self.poll_interval;
        let own_version = Arc::clone(&self.own_version);

        let thread_finish = Arc::new(AtomicBool::new(false));
        let finish = Arc::clone(&thread_finish);
        let handle = thread::Builder::new()
            .name("subscription".to_string())
            .spawn(move || {
                let mut last_poll = Instant::now();
                while !finish.load(Ordering::SeqCst) {
                    thread::sleep(POLL_TICK);
                    if last_poll.elapsed() < poll_interval {
                        continue;
                    }
                    last_poll = Instant::now();

                    let version = match document_version(&mut client, storage::MEASUREMENTS) {
                        Ok(version) => version,
                        Err(err) => {
                            log::warn!(target: "wpmon::db", "Could not poll for remote changes: \'{}\'", err);
                            continue;
                        }
                    };
                    let own = own_version.lock().map(|own| *own).unwrap_or(None);
                    match poll_outcome(version, last_seen, own) {
                        PollOutcome::Unchanged => continue,
                        PollOutcome::OwnWrite => {
                            log::debug!(target: "wpmon::db", "Skipping own write of the measurements");
                            last_seen = version;
                            continue;
                        }
                        PollOutcome::Changed => {}
                    }

                    match load_document::<Vec<Measurement>>(&mut client, storage::MEASUREMENTS) {
                        Ok(Some(measurements)) => {
                            log::info!(target: "wpmon::db", "Remote measurements changed ({} records)", measurements.len());
                            last_seen = version;
                            callback(measurements);
                        }
                        Ok(None) => {}
                        Err(err) => {
                            log::warn!(target: "wpmon::db", "Could not load remote measurements: \'{}\'", err);
                        }
                    }
                }
                log::debug!(target: "wpmon::db", "Subscription thread finished");
            })?;

        Ok(Some(Subscription::new(thread_finish, handle)))
    }
}
