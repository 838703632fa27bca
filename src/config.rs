// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the settings file that franken reads at start up.
//! Settings are resolved once in three layers: built-in defaults, the TOML
//! settings file, and finally `FRANKEN_*` environment variables. The
//! resulting [`Settings`] value is handed by reference to every component
//! that needs it.
//!
//! # Example
//!
//! ```toml
//! [paths]
//! state_file = "/var/lib/franken/state.json"
//! web_root = "/var/www"
//! proxy_config_dir = "/etc/caddy/sites.d"
//!
//! [proxy]
//! reload_command = ["systemctl", "reload", "caddy"]
//!
//! [database]
//! host = "localhost"
//! root_user = "root"
//! root_password = ""
//! ```

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info};

/// Default location of the settings file.
pub const DEFAULT_SETTINGS_FILE: &str = "/etc/franken/config.toml";

/// Settings for every component of franken.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Filesystem locations.
    pub paths: PathSettings,

    /// Reverse proxy settings.
    pub proxy: ProxySettings,

    /// Database server connection.
    pub database: DatabaseSettings,

    /// PHP runtime settings.
    pub php: PhpSettings,

    /// WordPress installer settings.
    pub wordpress: WordPressSettings,

    /// Secret generation settings.
    pub security: SecuritySettings,
}

impl Settings {
    /// Resolve settings from file and environment.
    ///
    /// If `path` is `None`, then [`DEFAULT_SETTINGS_FILE`] is read when it
    /// exists. An explicitly given path must exist.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::Read`] if settings file cannot be read.
    /// - Return [`SettingsError::Deserialize`] if settings file is malformed.
    /// - Return [`SettingsError::ShellExpansion`] if a path cannot be expanded.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::read(path)?,
            None => {
                let default = Path::new(DEFAULT_SETTINGS_FILE);
                if default.exists() {
                    Self::read(default)?
                } else {
                    debug!("no settings file at {}, using defaults", default.display());
                    Self::default()
                }
            }
        };

        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    fn read(path: &Path) -> Result<Self> {
        info!("load settings from {}", path.display());
        let data = read_to_string(path).map_err(|source| SettingsError::Read {
            source,
            path: path.to_path_buf(),
        })?;
        data.parse()
    }

    /// Override fields from `FRANKEN_*` variables.
    ///
    /// The lookup is injected so the override table can be exercised without
    /// touching the real process environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("FRANKEN_STATE_FILE") {
            self.paths.state_file = expand_path(&value)?;
        }
        if let Some(value) = lookup("FRANKEN_WEB_ROOT") {
            self.paths.web_root = expand_path(&value)?;
        }
        if let Some(value) = lookup("FRANKEN_PROXY_CONFIG_DIR") {
            self.paths.proxy_config_dir = expand_path(&value)?;
        }
        if let Some(value) = lookup("FRANKEN_PROXY_RELOAD") {
            self.proxy.reload_command = value.split_whitespace().map(String::from).collect();
        }
        if let Some(value) = lookup("FRANKEN_DB_HOST") {
            self.database.host = value;
        }
        if let Some(value) = lookup("FRANKEN_DB_ROOT_USER") {
            self.database.root_user = value;
        }
        if let Some(value) = lookup("FRANKEN_DB_ROOT_PASSWORD") {
            self.database.root_password = value;
        }
        if let Some(value) = lookup("FRANKEN_PHP_VERSION") {
            self.php.default_version = value.trim().to_string();
        }

        Ok(())
    }

    /// Filesystem root for a site.
    pub fn site_root(&self, primary_domain: &str) -> PathBuf {
        self.paths.web_root.join(primary_domain)
    }
}

impl FromStr for Settings {
    type Err = SettingsError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(SettingsError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        let paths = &mut settings.paths;
        paths.state_file = expand_path(&paths.state_file.to_string_lossy())?;
        paths.web_root = expand_path(&paths.web_root.to_string_lossy())?;
        paths.proxy_config_dir = expand_path(&paths.proxy_config_dir.to_string_lossy())?;
        paths.home_base = expand_path(&paths.home_base.to_string_lossy())?;
        if let Some(template) = settings.proxy.template.take() {
            settings.proxy.template = Some(expand_path(&template.to_string_lossy())?);
        }
        if let Some(template) = settings.wordpress.config_template.take() {
            settings.wordpress.config_template = Some(expand_path(&template.to_string_lossy())?);
        }

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(SettingsError::Serialize)?
                .as_str(),
        )
    }
}

/// Filesystem locations.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathSettings {
    /// JSON document recording every managed site.
    pub state_file: PathBuf,

    /// Directory under which each site root is created.
    pub web_root: PathBuf,

    /// Directory holding one proxy configuration file per site.
    pub proxy_config_dir: PathBuf,

    /// Parent of default home directories for standalone OS users.
    pub home_base: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("/var/lib/franken/state.json"),
            web_root: PathBuf::from("/var/www"),
            proxy_config_dir: PathBuf::from("/etc/caddy/sites.d"),
            home_base: PathBuf::from("/home"),
        }
    }
}

/// Reverse proxy settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Program and arguments that make the proxy pick up new configuration.
    pub reload_command: Vec<String>,

    /// Optional site block template with `{domains_line}` and `{web_root}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<PathBuf>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            reload_command: vec!["systemctl".into(), "reload".into(), "caddy".into()],
            template: None,
        }
    }
}

/// Database server connection.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Host name of the database server.
    pub host: String,

    /// Administrative account used for provisioning.
    pub root_user: String,

    /// Password of administrative account.
    pub root_password: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            root_user: "root".into(),
            root_password: String::new(),
        }
    }
}

/// PHP runtime settings.
///
/// FrankenPHP embeds PHP, so the version is only recorded for reference.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PhpSettings {
    /// Version label used when none is given.
    pub default_version: String,
}

impl Default for PhpSettings {
    fn default() -> Self {
        Self {
            default_version: "8.3".into(),
        }
    }
}

/// WordPress installer settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WordPressSettings {
    /// Release archive to download.
    pub download_url: String,

    /// Published SHA-1 checksum of release archive.
    pub checksum_url: String,

    /// Optional `wp-config.php` template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_template: Option<PathBuf>,
}

impl Default for WordPressSettings {
    fn default() -> Self {
        Self {
            download_url: "https://wordpress.org/latest.tar.gz".into(),
            checksum_url: "https://wordpress.org/latest.tar.gz.sha1".into(),
            config_template: None,
        }
    }
}

/// Secret generation settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Length of generated database passwords.
    pub password_length: usize,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            password_length: 32,
        }
    }
}

fn expand_path(path: &str) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path)
            .map_err(SettingsError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Failed to read settings file.
    #[error("failed to read settings file {path:?}")]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize settings.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize settings.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on settings.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<SettingsError> for FmtError {
    fn from(_: SettingsError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = SettingsError> = std::result::Result<T, E>;
