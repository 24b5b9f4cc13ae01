//! Daemon configuration, read from a YAML file.
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::database::DatabaseParameters;
use crate::error::{Error, Result};

fn default_actor() -> String {
    String::from("admin")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    2000
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Configuration {
    /// Name recorded as the actor of every audit entry.
    #[serde(default = "default_actor")]
    pub actor: String,
    #[serde(default)]
    pub storage: StorageParameters,
    /// Remote document store shared with other sessions.
    #[serde(default)]
    pub remote: Option<RemoteParameters>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StorageParameters {
    /// Directory of the local JSON documents.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Persist on a background thread instead of the caller's.
    #[serde(default = "default_true")]
    pub background_writer: bool,
}

impl Default for StorageParameters {
    fn default() -> Self {
        StorageParameters {
            data_dir: default_data_dir(),
            background_writer: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RemoteParameters {
    pub database: DatabaseParameters,
    /// Interval of the change subscription.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl RemoteParameters {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Configuration {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let configuration: Configuration = serde_yaml::from_str(yaml)?;
        if configuration.actor.trim().is_empty() {
            return Err(Error::Config(String::from("actor must not be empty")));
        }
        Ok(configuration)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut configuration_file = File::open(path.as_ref())?;
        let mut configuration_string = String::new();
        configuration_file.read_to_string(&mut configuration_string)?;
        Configuration::from_yaml(configuration_string.as_str())
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            actor: default_actor(),
            storage: StorageParameters::default(),
            remote: None,
        }
    }
}
