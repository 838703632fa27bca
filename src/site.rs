// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Site provisioning.
//!
//! A __site__ is a domain-scoped hosting unit: a filesystem root, an optional
//! OS account, an optional database with its own account, an optional
//! application payload, and a proxy site block. Every site franken manages is
//! described by a [`SiteRecord`] in the state file.
//!
//! # Adding Sites
//!
//! Adding a site runs these steps in order, stopping at the first failure:
//!
//! 1. Validate primary domain and aliases.
//! 2. Create the site root under the web root.
//! 3. Create an OS account bound to the site root, if requested.
//! 4. Provision a database and database account.
//! 5. Install the requested application.
//! 6. Write the proxy site block and reload the proxy.
//! 7. Record the site in the state file.
//!
//! None of the subsystems involved offer transactions, so every completed
//! step is pushed onto an [`UndoLog`]. If a later step fails, the log is
//! unwound in reverse so that no directory, account, database, or proxy file
//! is left behind. Writing the state file is the last step, so a site only
//! becomes visible once everything else is in place.
//!
//! Re-running an add for an existing site requires `force`. Resources that
//! already existed before a forced re-run are reused, and rollback leaves
//! them in place.
//!
//! # Deleting Sites
//!
//! Deleting a site is best effort. Every teardown step is attempted even if
//! an earlier one failed, and all failures are reported together once the
//! state record is gone.
//!
//! # See Also
//!
//! 1. [`saga`]

pub mod saga;

use crate::{
    config::Settings,
    database::{Credentials, DatabaseAdmin, DatabaseError, MysqlAdmin},
    exec::SystemRunner,
    proxy::{CaddyConfig, ProxyConfig, ProxyError},
    site::saga::{join_failures, Compensate, StepFailure, Undo, UndoLog},
    state::{App, SiteRecord, StateDocument, StateError, StateStore},
    user::{AccountManager, SystemAccounts, UserError},
    validate::{
        ensure_domains, ensure_identifier, normalize_domain, validate_domain, ValidationError,
        MAX_IDENTIFIER_LEN,
    },
    wordpress::{InstallError, Installer, WordPress},
};

use std::{
    fs::{create_dir_all, remove_dir_all},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Longest username `useradd` accepts.
pub const USERNAME_MAX_LEN: usize = 32;

/// Options for adding a site.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AddSite {
    /// Extra domains served by the site.
    pub aliases: Vec<String>,

    /// Application to install.
    pub app: Option<App>,

    /// PHP version label. Defaults to the configured version.
    pub php_version: Option<String>,

    /// Create an OS account owning the site root.
    pub create_user: bool,

    /// Re-provision an existing site.
    pub force: bool,
}

/// Orchestrate site provisioning across every subsystem.
#[derive(Debug)]
pub struct SiteManager<
    D = MysqlAdmin,
    U = SystemAccounts<SystemRunner>,
    P = CaddyConfig<SystemRunner>,
    A = WordPress,
> {
    store: StateStore,
    settings: Settings,
    database: D,
    accounts: U,
    proxy: P,
    installer: A,
    dry_run: bool,
}

impl SiteManager {
    /// Construct site manager backed by the real system.
    pub fn system(settings: &Settings, dry_run: bool) -> Self {
        let runner = SystemRunner::new(dry_run);
        Self::new(
            settings,
            MysqlAdmin::new(
                &settings.database,
                settings.security.password_length,
                dry_run,
            ),
            SystemAccounts::new(settings.paths.home_base.clone(), runner),
            CaddyConfig::new(settings, runner),
            WordPress::new(settings, dry_run),
            dry_run,
        )
    }
}

impl<D, U, P, A> SiteManager<D, U, P, A>
where
    D: DatabaseAdmin,
    U: AccountManager,
    P: ProxyConfig,
    A: Installer,
{
    /// Construct new site manager.
    ///
    /// Collaborators are expected to share the given dry-run mode.
    pub fn new(
        settings: &Settings,
        database: D,
        accounts: U,
        proxy: P,
        installer: A,
        dry_run: bool,
    ) -> Self {
        Self {
            store: StateStore::new(settings.paths.state_file.clone()),
            settings: settings.clone(),
            database,
            accounts,
            proxy,
            installer,
            dry_run,
        }
    }

    /// Provision a new site, rolling back on failure.
    ///
    /// # Errors
    ///
    /// - Return [`SiteError::Validation`] if a domain is invalid. Nothing has
    ///   been touched at that point.
    /// - Return [`SiteError::Conflict`] if the site or its directory already
    ///   exists and `force` is not set, or if the derived database name is
    ///   already taken by another site or by the server.
    /// - Return the error of the failing step otherwise, after every
    ///   completed step has been reversed.
    /// - Return [`SiteError::RollbackIncomplete`] if reversing a completed
    ///   step failed as well.
    #[instrument(skip(self, options), level = "debug")]
    pub fn add(&self, primary_domain: &str, options: &AddSite) -> Result<SiteRecord> {
        let primary = normalize_domain(primary_domain);
        let aliases = options
            .aliases
            .iter()
            .map(|alias| normalize_domain(alias))
            .collect::<Vec<_>>();
        ensure_domains(&primary, &aliases)?;

        let mut document = self.store.load();
        let existing = document.get(&primary).cloned();
        if existing.is_some() && !options.force {
            return Err(SiteError::Conflict(format!(
                "site {primary} already exists, use --force to re-provision"
            )));
        }

        let mut undo = UndoLog::default();
        match self.provision(
            &primary,
            aliases,
            options,
            existing.as_ref(),
            &mut document,
            &mut undo,
        ) {
            Ok(record) => {
                info!("site {primary} ready at {}", record.path.display());
                Ok(record)
            }
            Err(error) if self.dry_run => Err(error),
            Err(error) => {
                warn!("provisioning {primary} failed: {error}, rolling back");
                let failures = undo.unwind(self);
                if failures.is_empty() {
                    Err(error)
                } else {
                    Err(SiteError::RollbackIncomplete {
                        source: Box::new(error),
                        failures,
                    })
                }
            }
        }
    }

    fn provision(
        &self,
        primary: &str,
        aliases: Vec<String>,
        options: &AddSite,
        existing: Option<&SiteRecord>,
        document: &mut StateDocument,
        undo: &mut UndoLog,
    ) -> Result<SiteRecord> {
        let site_root = existing
            .map(|record| record.path.clone())
            .unwrap_or_else(|| self.settings.site_root(primary));
        let php_version = options
            .php_version
            .as_deref()
            .unwrap_or(&self.settings.php.default_version)
            .trim()
            .to_string();

        let username = site_username(primary);
        if options.create_user {
            ensure_identifier(&username, "username")?;
        }

        let recorded = existing.and_then(SiteRecord::database).map(|(name, user, password)| {
            Credentials {
                name: name.into(),
                user: user.into(),
                password: password.into(),
            }
        });
        let (db_name, db_user) = match &recorded {
            Some(credentials) => (credentials.name.clone(), credentials.user.clone()),
            None => {
                let name = self.unclaimed_database_name(primary, document)?;
                (name.clone(), name)
            }
        };
        ensure_identifier(&db_user, "database user")?;

        let preexisting = site_root.exists();
        if preexisting && !options.force {
            return Err(SiteError::Conflict(format!(
                "directory {} already exists, use --force to re-provision",
                site_root.display()
            )));
        }
        if self.dry_run {
            info!("[dry-run] would create {}", site_root.display());
        } else if !preexisting {
            create_dir_all(&site_root).map_err(|source| SiteError::Io {
                source,
                path: site_root.clone(),
            })?;
        }
        undo.push(Undo::DirectoryCreated {
            path: site_root.clone(),
            preexisting,
        });

        let mut linux_user = existing.and_then(|record| record.linux_user.clone());
        if options.create_user {
            if linux_user.as_deref() == Some(username.as_str()) && self.accounts.exists(&username) {
                debug!("reusing user {username}");
            } else {
                self.accounts.create(&username, Some(&site_root))?;
                undo.push(Undo::UserCreated {
                    username: username.clone(),
                });
            }
            linux_user = Some(username);
        }

        let credentials = match recorded {
            Some(credentials) if options.app.is_none() => {
                debug!("keeping database {}", credentials.name);
                credentials
            }
            recorded => {
                // INVARIANT: Record before creating, a partial create can
                // leave the database behind.
                undo.push(Undo::DatabaseCreated {
                    name: db_name.clone(),
                    user: db_user.clone(),
                    preexisting: recorded.is_some(),
                });
                let password = recorded.as_ref().map(|credentials| credentials.password.as_str());
                self.database.create(&db_name, Some(&db_user), password)?
            }
        };

        if let Some(app) = options.app {
            info!("install {app} into {}", site_root.display());
            self.installer
                .install(&site_root, &credentials, &self.settings.database.host)?;
            undo.push(Undo::ApplicationInstalled);

            if let Some(username) = &linux_user {
                self.accounts.chown_recursive(&site_root, username)?;
            }
        }

        // INVARIANT: Record before writing, reload can fail after the file
        // lands.
        undo.push(Undo::ProxyWritten {
            domain: primary.into(),
            preexisting: existing.is_some() && self.proxy.config_path(primary).exists(),
        });
        self.proxy
            .write(primary, &aliases, &site_root, &php_version)?;

        let record = SiteRecord {
            primary_domain: primary.into(),
            aliases,
            path: site_root,
            php_version,
            app: options.app.or(existing.and_then(|record| record.app)),
            db_name: Some(credentials.name),
            db_user: Some(credentials.user),
            db_password: Some(credentials.password),
            linux_user,
        };
        document.set(primary, record.clone());
        self.commit(document)?;

        Ok(record)
    }

    /// Tear down everything recorded for a site.
    ///
    /// Proceeds even when the site is not in the state file, cleaning up
    /// whatever can be derived from the domain alone. Deleting twice is
    /// harmless.
    ///
    /// # Errors
    ///
    /// - Return [`SiteError::Validation`] if the domain is invalid.
    /// - Return [`SiteError::TeardownIncomplete`] listing every step that
    ///   failed, after all steps were attempted.
    #[instrument(skip(self), level = "debug")]
    pub fn delete(&self, primary_domain: &str) -> Result<()> {
        let primary = normalize_domain(primary_domain);
        if !validate_domain(&primary) {
            return Err(ValidationError::PrimaryDomain(primary).into());
        }

        let mut document = self.store.load();
        let record = document.get(&primary).cloned();
        if record.is_none() {
            warn!("site {primary} is not in state, cleaning up anyway");
        }

        let mut failures = Vec::new();
        let site_root = record
            .as_ref()
            .map(|record| record.path.clone())
            .unwrap_or_else(|| self.settings.site_root(&primary));
        let outcome = if self.dry_run {
            if site_root.exists() {
                info!("[dry-run] would remove {}", site_root.display());
            }
            Ok(())
        } else {
            remove_tree(&site_root)
        };
        record_failure(&mut failures, "directory", outcome);

        if let Some(record) = &record {
            let shared = record.db_name.as_deref().and_then(|name| {
                document
                    .records()
                    .find(|other| {
                        other.primary_domain != primary && other.db_name.as_deref() == Some(name)
                    })
                    .map(|other| other.primary_domain.clone())
            });
            if let Some(owner) = shared {
                warn!("database of {primary} also belongs to {owner}, leaving it in place");
            } else if let Some(name) = &record.db_name {
                let outcome = self
                    .database
                    .delete(name, record.db_user.as_deref())
                    .map_err(SiteError::from);
                record_failure(&mut failures, "database", outcome);
            }

            if let Some(username) = &record.linux_user {
                let outcome = if self.accounts.exists(username) {
                    self.accounts
                        .delete(username, false)
                        .map_err(SiteError::from)
                } else {
                    debug!("user {username} already gone");
                    Ok(())
                };
                record_failure(&mut failures, "user", outcome);
            }
        }

        let outcome = self
            .proxy
            .remove(&primary)
            .map(|removed| {
                if !removed {
                    debug!("no proxy config for {primary}");
                }
            })
            .map_err(SiteError::from);
        record_failure(&mut failures, "proxy", outcome);

        if document.remove(&primary) {
            let outcome = self.commit(&document);
            record_failure(&mut failures, "state", outcome);
        }

        if !failures.is_empty() {
            return Err(SiteError::TeardownIncomplete { failures });
        }

        info!("site {primary} deleted");
        Ok(())
    }

    /// Every recorded site ordered by primary domain.
    pub fn list(&self) -> Vec<SiteRecord> {
        self.store.load().records().cloned().collect()
    }

    /// Recorded site for a domain.
    pub fn info(&self, primary_domain: &str) -> Option<SiteRecord> {
        self.store
            .load()
            .get(&normalize_domain(primary_domain))
            .cloned()
    }

    /// Whether the database recorded for a site exists on the server.
    ///
    /// Returns `None` if no database is recorded.
    pub fn database_present(&self, record: &SiteRecord) -> Option<bool> {
        record
            .db_name
            .as_deref()
            .map(|name| self.database.exists(name))
    }

    /// Install an application into an existing site.
    ///
    /// Database credentials are created and recorded first if the site has
    /// none, so a failed install never leaves an unrecorded database.
    ///
    /// # Errors
    ///
    /// - Return [`SiteError::NotFound`] if the site is not recorded.
    /// - Return the error of the failing step otherwise. No rollback is
    ///   performed.
    #[instrument(skip(self), level = "debug")]
    pub fn install_app(&self, primary_domain: &str, app: App) -> Result<SiteRecord> {
        let primary = normalize_domain(primary_domain);
        let mut document = self.store.load();
        let mut record = document
            .get(&primary)
            .cloned()
            .ok_or_else(|| SiteError::NotFound(primary.clone()))?;

        let credentials = match record.database() {
            Some((name, user, password)) => Credentials {
                name: name.into(),
                user: user.into(),
                password: password.into(),
            },
            None => {
                let name = self.unclaimed_database_name(&primary, &document)?;
                let credentials = self.database.create(&name, None, None)?;
                record.db_name = Some(credentials.name.clone());
                record.db_user = Some(credentials.user.clone());
                record.db_password = Some(credentials.password.clone());
                document.set(&primary, record.clone());
                self.commit(&document)?;
                credentials
            }
        };

        info!("install {app} into {}", record.path.display());
        self.installer
            .install(&record.path, &credentials, &self.settings.database.host)?;
        if let Some(username) = &record.linux_user {
            self.accounts.chown_recursive(&record.path, username)?;
        }

        record.app = Some(app);
        document.set(&primary, record.clone());
        self.commit(&document)?;

        Ok(record)
    }

    /// Database name for a site that has none recorded yet.
    ///
    /// Distinct domains can derive the same name, so a name owned by another
    /// recorded site or already present on the server is a conflict.
    fn unclaimed_database_name(&self, primary: &str, document: &StateDocument) -> Result<String> {
        let name = database_name(primary);
        ensure_identifier(&name, "database name")?;

        if let Some(owner) = document
            .records()
            .find(|record| record.db_name.as_deref() == Some(name.as_str()))
        {
            return Err(SiteError::Conflict(format!(
                "database {name} already belongs to site {}",
                owner.primary_domain
            )));
        }

        if self.database.exists(&name) {
            return Err(SiteError::Conflict(format!(
                "database {name} already exists on the server"
            )));
        }

        Ok(name)
    }

    fn commit(&self, document: &StateDocument) -> Result<()> {
        if self.dry_run {
            info!("[dry-run] would save state to {}", self.store.path().display());
            return Ok(());
        }

        self.store.save(document)?;
        Ok(())
    }
}

impl<D, U, P, A> Compensate for SiteManager<D, U, P, A>
where
    D: DatabaseAdmin,
    U: AccountManager,
    P: ProxyConfig,
    A: Installer,
{
    fn compensate(&self, undo: &Undo) -> std::result::Result<(), String> {
        let outcome = match undo {
            Undo::DirectoryCreated {
                preexisting: true, ..
            }
            | Undo::DatabaseCreated {
                preexisting: true, ..
            }
            | Undo::ProxyWritten {
                preexisting: true, ..
            } => {
                debug!("leaving pre-existing {} in place", undo.step());
                Ok(())
            }
            Undo::ApplicationInstalled => Ok(()),
            Undo::ProxyWritten { domain, .. } => self
                .proxy
                .remove(domain)
                .map(|_| ())
                .map_err(SiteError::from),
            Undo::DatabaseCreated { name, user, .. } => self
                .database
                .delete(name, Some(user))
                .map_err(SiteError::from),
            Undo::UserCreated { username } => self
                .accounts
                .delete(username, false)
                .map_err(SiteError::from),
            Undo::DirectoryCreated { path, .. } => remove_tree(path),
        };

        outcome.map_err(|error| error_chain(&error))
    }
}

/// Database name and account derived from a primary domain.
pub fn database_name(primary_domain: &str) -> String {
    primary_domain
        .replace(['.', '-'], "_")
        .chars()
        .take(MAX_IDENTIFIER_LEN)
        .collect()
}

/// OS account name derived from the first label of a primary domain.
pub fn site_username(primary_domain: &str) -> String {
    primary_domain
        .split('.')
        .next()
        .unwrap_or_default()
        .replace('-', "_")
        .chars()
        .take(USERNAME_MAX_LEN)
        .collect()
}

fn remove_tree(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    remove_dir_all(path).map_err(|source| SiteError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    info!("removed {}", path.display());

    Ok(())
}

fn record_failure(failures: &mut Vec<StepFailure>, step: &'static str, outcome: Result<()>) {
    if let Err(error) = outcome {
        let message = error_chain(&error);
        warn!("teardown step {step} failed: {message}");
        failures.push(StepFailure { step, message });
    }
}

/// Render error and every source as one line.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    message
}

/// Site orchestration error types.
#[derive(Debug, thiserror::Error)]
pub enum SiteError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Site, directory, or database name is already taken.
    #[error("{0}")]
    Conflict(String),

    /// Site is not recorded in the state file.
    #[error("site {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    User(#[from] UserError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    State(#[from] StateError),

    /// Site directory cannot be created or removed.
    #[error("failed to update site directory {path:?}")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Provisioning failed and some completed steps could not be reversed.
    #[error("{source}; rollback incomplete: {}", join_failures(.failures))]
    RollbackIncomplete {
        source: Box<SiteError>,
        failures: Vec<StepFailure>,
    },

    /// Some teardown steps failed.
    #[error("teardown incomplete: {}", join_failures(.failures))]
    TeardownIncomplete { failures: Vec<StepFailure> },
}

/// Friendly result alias :3
pub type Result<T, E = SiteError> = std::result::Result<T, E>;
