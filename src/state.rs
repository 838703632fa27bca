// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Durable record of managed sites.
//!
//! Franken remembers what it has provisioned in a single JSON document, the
//! __state file__. The state file maps each site's primary domain to a
//! [`SiteRecord`] describing everything franken created for it.
//!
//! # State File Layout
//!
//! ```json
//! {
//!   "version": 1,
//!   "sites": {
//!     "example.com": {
//!       "primary_domain": "example.com",
//!       "aliases": ["www.example.com"],
//!       "path": "/var/www/example.com",
//!       "php_version": "8.3",
//!       "app": "wordpress",
//!       "db_name": "example_com",
//!       "db_user": "example_com",
//!       "db_password": "..."
//!     }
//!   }
//! }
//! ```
//!
//! The document is read permissively: a missing or unparsable file yields an
//! empty document rather than an error, so a damaged state file never locks
//! the operator out of the tool. Writes replace the whole document through a
//! temporary file in the same directory that is renamed over the target.
//!
//! Database passwords are kept in cleartext. The state file should therefore
//! be readable by root only.
//!
//! # Pitfalls
//!
//! There is no locking. Two franken processes mutating the state file at
//! the same time will lose one of the updates.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

/// Current state document version.
pub const STATE_VERSION: u32 = 1;

/// Application installed into a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum App {
    /// WordPress release archive plus `wp-config.php`.
    WordPress,
}

impl FromStr for App {
    type Err = UnknownApp;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "wordpress" => Ok(Self::WordPress),
            _ => Err(UnknownApp(value.to_string())),
        }
    }
}

impl Display for App {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::WordPress => fmt.write_str("wordpress"),
        }
    }
}

/// Application name was not recognized.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown application {0:?}, expected \"wordpress\"")]
pub struct UnknownApp(pub String);

/// Everything franken provisioned for one site.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SiteRecord {
    /// Canonical domain, also the key of this record.
    pub primary_domain: String,

    /// Additional domains served by the same site.
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Filesystem root of the site.
    pub path: PathBuf,

    /// PHP version label, informational only.
    pub php_version: String,

    /// Installed application, if any.
    #[serde(default)]
    pub app: Option<App>,

    /// Database name, if a database was provisioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,

    /// Database user, if a database was provisioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_user: Option<String>,

    /// Database password, if a database was provisioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_password: Option<String>,

    /// OS account, if one was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux_user: Option<String>,
}

impl SiteRecord {
    /// Recorded database name, user, and password when all three exist.
    pub fn database(&self) -> Option<(&str, &str, &str)> {
        match (&self.db_name, &self.db_user, &self.db_password) {
            (Some(name), Some(user), Some(password)) => {
                Some((name.as_str(), user.as_str(), password.as_str()))
            }
            _ => None,
        }
    }
}

/// Whole state document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StateDocument {
    /// Layout version.
    pub version: u32,

    /// Site records keyed by primary domain.
    pub sites: BTreeMap<String, SiteRecord>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            sites: BTreeMap::new(),
        }
    }
}

impl StateDocument {
    /// Look up a site by primary domain.
    pub fn get(&self, domain: &str) -> Option<&SiteRecord> {
        self.sites.get(&domain_key(domain))
    }

    /// Insert or replace a site record.
    pub fn set(&mut self, domain: &str, record: SiteRecord) {
        self.sites.insert(domain_key(domain), record);
    }

    /// Remove a site record, returning whether it existed.
    pub fn remove(&mut self, domain: &str) -> bool {
        self.sites.remove(&domain_key(domain)).is_some()
    }

    /// All site records ordered by primary domain.
    pub fn records(&self) -> impl Iterator<Item = &SiteRecord> {
        self.sites.values()
    }
}

fn domain_key(domain: &str) -> String {
    domain.trim().to_lowercase()
}

/// Manage the state file on disk.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Construct new state store for the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path to the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load state document.
    ///
    /// Missing files yield an empty document silently. Unreadable or
    /// malformed files are logged and also yield an empty document.
    #[instrument(skip(self), level = "debug")]
    pub fn load(&self) -> StateDocument {
        if !self.path.exists() {
            debug!("no state file at {}", self.path.display());
            return StateDocument::default();
        }

        match self.try_load() {
            Ok(document) => document,
            Err(error) => {
                warn!("could not load state file: {error}, using empty state");
                StateDocument::default()
            }
        }
    }

    fn try_load(&self) -> Result<StateDocument> {
        let data = read_to_string(&self.path).map_err(|source| StateError::Read {
            source,
            path: self.path.clone(),
        })?;
        let document: StateDocument = serde_json::from_str(&data).map_err(StateError::Parse)?;

        // INVARIANT: Every key equals its record's normalized primary domain.
        let mut sites = BTreeMap::new();
        for (key, record) in document.sites {
            let canonical = domain_key(&record.primary_domain);
            if key != canonical {
                warn!("state key {key:?} does not match record {canonical:?}, re-keying");
            }
            sites.insert(canonical, record);
        }

        Ok(StateDocument {
            version: document.version,
            sites,
        })
    }

    /// Replace state file with given document.
    ///
    /// # Errors
    ///
    /// - Return [`StateError::Write`] if state directory or temporary file
    ///   cannot be written.
    /// - Return [`StateError::Serialize`] if document cannot be serialized.
    /// - Return [`StateError::Persist`] if temporary file cannot be renamed
    ///   over the state file.
    #[instrument(skip(self, document), level = "debug")]
    pub fn save(&self, document: &StateDocument) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        mkdirp::mkdirp(&parent).map_err(|source| StateError::Write {
            source,
            path: parent.clone(),
        })?;

        let mut file = NamedTempFile::new_in(&parent).map_err(|source| StateError::Write {
            source,
            path: parent.clone(),
        })?;
        serde_json::to_writer_pretty(&mut file, document).map_err(StateError::Serialize)?;
        file.write_all(b"\n")
            .and_then(|()| file.as_file().sync_all())
            .map_err(|source| StateError::Write {
                source,
                path: file.path().to_path_buf(),
            })?;
        file.persist(&self.path)
            .map_err(|error| StateError::Persist {
                source: error.error,
                path: self.path.clone(),
            })?;

        debug!("state saved to {}", self.path.display());
        Ok(())
    }
}

/// State file error types.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// State file could not be read.
    #[error("failed to read state file {path:?}")]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// State file is not a valid state document.
    #[error("state file is malformed")]
    Parse(#[source] serde_json::Error),

    /// State document could not be serialized.
    #[error("failed to serialize state")]
    Serialize(#[source] serde_json::Error),

    /// State directory or temporary file could not be written.
    #[error("failed to write {path:?}")]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Temporary file could not replace the state file.
    #[error("failed to replace state file {path:?}")]
    Persist {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
type Result<T, E = StateError> = std::result::Result<T, E>;
