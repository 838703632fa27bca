// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Reverse proxy site configuration.
//!
//! FrankenPHP is a Caddy build with PHP embedded, so a site needs nothing
//! more than a Caddy site block that points the `php_server` directive at
//! the site root. No separate PHP-FPM process exists, and `php_fastcgi` is
//! never emitted.
//!
//! Each site gets one file in the proxy configuration directory, named after
//! its primary domain with dots replaced by underscores. The main Caddyfile
//! is expected to `import` every file in that directory.

use crate::{config::Settings, exec::CommandRunner};

use std::{
    ffi::OsStr,
    fs::{read_to_string, remove_file, write},
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

/// Extension of site configuration files.
pub const CONFIG_EXTENSION: &str = "conf";

/// Layer of indirection for proxy configuration.
pub trait ProxyConfig {
    /// Path of the configuration file for a site.
    fn config_path(&self, primary_domain: &str) -> PathBuf;

    /// Render site block for primary domain and aliases.
    fn render(
        &self,
        primary_domain: &str,
        aliases: &[String],
        web_root: &Path,
        php_version: &str,
    ) -> Result<String>;

    /// Write site block and reload proxy. Overwrites existing file.
    fn write(
        &self,
        primary_domain: &str,
        aliases: &[String],
        web_root: &Path,
        php_version: &str,
    ) -> Result<()>;

    /// Remove site block, reloading proxy only if a file was removed.
    fn remove(&self, primary_domain: &str) -> Result<bool>;

    /// Make proxy pick up configuration changes.
    fn reload(&self) -> Result<()>;
}

/// Caddy site configuration for FrankenPHP.
#[derive(Debug, Clone)]
pub struct CaddyConfig<R>
where
    R: CommandRunner,
{
    config_dir: PathBuf,
    reload_command: Vec<String>,
    template: Option<PathBuf>,
    runner: R,
}

impl<R> CaddyConfig<R>
where
    R: CommandRunner,
{
    /// Construct new Caddy configuration manager.
    pub fn new(settings: &Settings, runner: R) -> Self {
        Self {
            config_dir: settings.paths.proxy_config_dir.clone(),
            reload_command: settings.proxy.reload_command.clone(),
            template: settings.proxy.template.clone(),
            runner,
        }
    }
}

impl<R> ProxyConfig for CaddyConfig<R>
where
    R: CommandRunner,
{
    fn config_path(&self, primary_domain: &str) -> PathBuf {
        let safe_name = primary_domain.replace('.', "_");
        self.config_dir
            .join(format!("{safe_name}.{CONFIG_EXTENSION}"))
    }

    fn render(
        &self,
        primary_domain: &str,
        aliases: &[String],
        web_root: &Path,
        _php_version: &str,
    ) -> Result<String> {
        let domains_line = domains_line(primary_domain, aliases);
        let web_root = web_root.display().to_string();

        let template = match &self.template {
            Some(path) if path.exists() => {
                read_to_string(path).map_err(|source| ProxyError::Template {
                    source,
                    path: path.clone(),
                })?
            }
            _ => return Ok(default_site_block(&domains_line, &web_root)),
        };

        Ok(template
            .replace("{domains_line}", &domains_line)
            .replace("{web_root}", &web_root))
    }

    #[instrument(skip(self, aliases, php_version), level = "debug")]
    fn write(
        &self,
        primary_domain: &str,
        aliases: &[String],
        web_root: &Path,
        php_version: &str,
    ) -> Result<()> {
        let path = self.config_path(primary_domain);
        let contents = self.render(primary_domain, aliases, web_root, php_version)?;
        if self.runner.is_dry_run() {
            info!("[dry-run] would write proxy config to {}", path.display());
            return Ok(());
        }

        mkdirp::mkdirp(&self.config_dir).map_err(|source| ProxyError::Write {
            source,
            path: self.config_dir.clone(),
        })?;
        write(&path, contents).map_err(|source| ProxyError::Write {
            source,
            path: path.clone(),
        })?;
        info!("wrote proxy config {}", path.display());

        self.reload()
    }

    #[instrument(skip(self), level = "debug")]
    fn remove(&self, primary_domain: &str) -> Result<bool> {
        let path = self.config_path(primary_domain);
        if self.runner.is_dry_run() {
            let exists = path.exists();
            if exists {
                info!("[dry-run] would remove {} and reload proxy", path.display());
            }
            return Ok(exists);
        }

        if !path.exists() {
            return Ok(false);
        }

        remove_file(&path).map_err(|source| ProxyError::Write {
            source,
            path: path.clone(),
        })?;
        info!("removed proxy config {}", path.display());
        self.reload()?;

        Ok(true)
    }

    fn reload(&self) -> Result<()> {
        let (program, args) = self
            .reload_command
            .split_first()
            .ok_or(ProxyError::EmptyReloadCommand)?;
        let args = args.iter().map(OsStr::new).collect::<Vec<_>>();
        self.runner.run(program, &args)?;

        Ok(())
    }
}

/// Primary domain followed by every distinct alias, space separated.
fn domains_line(primary_domain: &str, aliases: &[String]) -> String {
    let mut domains = vec![primary_domain];
    for alias in aliases {
        if !domains.iter().any(|domain| domain.eq_ignore_ascii_case(alias)) {
            domains.push(alias.as_str());
        }
    }

    domains.join(" ")
}

fn default_site_block(domains_line: &str, web_root: &str) -> String {
    format!("{domains_line} {{\n    root * {web_root}\n    php_server\n}}\n")
}

/// Proxy configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Configured site block template cannot be read.
    #[error("failed to read proxy template {path:?}")]
    Template {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Configuration file or directory cannot be written or removed.
    #[error("failed to update proxy config {path:?}")]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Reload command is empty.
    #[error("proxy reload command is empty")]
    EmptyReloadCommand,

    /// Reload command failed.
    #[error("proxy reload failed")]
    Reload(#[from] crate::exec::ExecError),
}

/// Friendly result alias :3
pub type Result<T, E = ProxyError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ExecError, SystemRunner};
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    #[derive(Debug, Default)]
    struct RecordingRunner {
        dry_run: bool,
        calls: RefCell<Vec<String>>,
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, program: &str, args: &[&OsStr]) -> crate::exec::Result<String> {
            self.calls
                .borrow_mut()
                .push(crate::exec::render_command(program, args));
            Ok(String::new())
        }

        fn probe(&self, _program: &str, _args: &[&OsStr]) -> bool {
            true
        }

        fn is_dry_run(&self) -> bool {
            self.dry_run
        }
    }

    fn settings(dir: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.paths.proxy_config_dir = dir.join("sites.d");
        settings.proxy.reload_command = vec!["caddy".into(), "reload".into()];
        settings
    }

    #[test]
    fn config_path_replaces_dots() {
        let settings = Settings::default();
        let caddy = CaddyConfig::new(&settings, SystemRunner::new(true));
        let path = caddy.config_path("example.com");
        assert_eq!(path, PathBuf::from("/etc/caddy/sites.d/example_com.conf"));
        assert!(path.ends_with("example_com.conf"));
    }

    #[test]
    fn render_default_block() -> anyhow::Result<()> {
        let settings = Settings::default();
        let caddy = CaddyConfig::new(&settings, SystemRunner::new(true));
        let result = caddy.render(
            "example.com",
            &["www.example.com".into()],
            Path::new("/var/www/example.com"),
            "8.3",
        )?;

        let expect = indoc! {"
            example.com www.example.com {
                root * /var/www/example.com
                php_server
            }
        "};

        assert_eq!(result, expect);
        assert!(!result.contains("php_fastcgi"));

        Ok(())
    }

    #[test]
    fn render_deduplicates_aliases() -> anyhow::Result<()> {
        let settings = Settings::default();
        let caddy = CaddyConfig::new(&settings, SystemRunner::new(true));
        let result = caddy.render(
            "example.com",
            &["example.com".into(), "a.example.com".into(), "A.example.com".into()],
            Path::new("/srv/x"),
            "8.3",
        )?;
        assert!(result.starts_with("example.com a.example.com {"));

        Ok(())
    }

    #[test]
    fn render_uses_template() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let template = dir.path().join("caddy.tpl");
        write(&template, "{domains_line} {\n    root * {web_root}\n    encode gzip\n    php_server\n}\n")?;

        let mut settings = settings(dir.path());
        settings.proxy.template = Some(template);
        let caddy = CaddyConfig::new(&settings, SystemRunner::new(true));
        let result = caddy.render("example.com", &[], Path::new("/var/www/example.com"), "8.3")?;
        assert_eq!(
            result,
            "example.com {\n    root * /var/www/example.com\n    encode gzip\n    php_server\n}\n"
        );

        Ok(())
    }

    #[test]
    fn write_then_remove_reloads_each_time() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = settings(dir.path());
        let runner = RecordingRunner::default();
        let caddy = CaddyConfig::new(&settings, &runner);

        caddy.write("example.com", &[], Path::new("/var/www/example.com"), "8.3")?;
        caddy.write("example.com", &[], Path::new("/var/www/example.com"), "8.3")?;
        let path = caddy.config_path("example.com");
        assert!(path.exists());

        assert!(caddy.remove("example.com")?);
        assert!(!path.exists());
        assert!(!caddy.remove("example.com")?);

        assert_eq!(
            runner.calls.borrow().as_slice(),
            &["caddy reload", "caddy reload", "caddy reload"]
        );

        Ok(())
    }

    #[test]
    fn dry_run_write_touches_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = settings(dir.path());
        let runner = RecordingRunner {
            dry_run: true,
            ..RecordingRunner::default()
        };
        let caddy = CaddyConfig::new(&settings, &runner);

        caddy.write("example.com", &[], Path::new("/var/www/example.com"), "8.3")?;
        assert!(!settings.paths.proxy_config_dir.exists());
        assert!(!caddy.remove("example.com")?);
        assert!(runner.calls.borrow().is_empty());

        Ok(())
    }

    #[test]
    fn reload_failure_is_surfaced() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut settings = settings(dir.path());
        settings.proxy.reload_command = vec!["false".into()];
        let caddy = CaddyConfig::new(&settings, SystemRunner::new(false));

        let result = caddy.write("example.com", &[], Path::new("/var/www/example.com"), "8.3");
        assert!(matches!(
            result,
            Err(ProxyError::Reload(ExecError::Failed { .. }))
        ));

        Ok(())
    }

    #[test]
    fn empty_reload_command_is_rejected() {
        let mut settings = Settings::default();
        settings.proxy.reload_command.clear();
        let caddy = CaddyConfig::new(&settings, SystemRunner::new(true));
        assert!(matches!(caddy.reload(), Err(ProxyError::EmptyReloadCommand)));
    }
}
