// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! WordPress installation.
//!
//! Installing WordPress into a site root takes three steps:
//!
//! 1. Download the release archive and check it against the published SHA-1
//!    checksum.
//! 2. Unpack the archive. Releases wrap everything in a top-level
//!    `wordpress/` directory, which is flattened away so the files land
//!    directly in the site root.
//! 3. Write `wp-config.php` pointing at the site's database, then normalize
//!    permissions across the site root: directories `0755`, files `0644`.
//!
//! A failed download or unpack aborts the install. Files already unpacked
//! are left behind; the caller is expected to remove the site root.

use crate::{config::Settings, database::Credentials};

use flate2::read::GzDecoder;
use ignore::WalkBuilder;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use sha1::{Digest, Sha1};
use std::{
    fs::{
        read_dir, read_to_string, remove_dir_all, remove_file, rename, set_permissions, write,
        Permissions,
    },
    io::copy,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    time::Duration,
};
use tar::Archive;
use tracing::{debug, info, instrument};

/// Ceiling on each download request.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Name of generated configuration file inside site root.
pub const CONFIG_FILE: &str = "wp-config.php";

const DEFAULT_CONFIG_TEMPLATE: &str = "<?php
define('DB_NAME', '{db_name}');
define('DB_USER', '{db_user}');
define('DB_PASSWORD', '{db_pass}');
define('DB_HOST', '{db_host}');
";

/// Layer of indirection for application installation.
pub trait Installer {
    /// Install application into site root, wired to given database.
    fn install(&self, site_root: &Path, database: &Credentials, db_host: &str) -> Result<()>;
}

/// WordPress installer.
#[derive(Debug, Clone)]
pub struct WordPress {
    download_url: String,
    checksum_url: String,
    config_template: Option<PathBuf>,
    dry_run: bool,
}

impl WordPress {
    /// Construct new WordPress installer.
    pub fn new(settings: &Settings, dry_run: bool) -> Self {
        Self {
            download_url: settings.wordpress.download_url.clone(),
            checksum_url: settings.wordpress.checksum_url.clone(),
            config_template: settings.wordpress.config_template.clone(),
            dry_run,
        }
    }

    /// Download release archive and unpack it into `dest_dir`.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError::Network`] if either request fails or times out.
    /// - Return [`InstallError::Checksum`] if archive does not match checksum.
    /// - Return [`InstallError::Io`] if unpacking fails.
    #[instrument(skip(self), level = "debug")]
    pub fn download(&self, dest_dir: &Path) -> Result<()> {
        if self.dry_run {
            info!(
                "[dry-run] would download {} to {}",
                self.download_url,
                dest_dir.display()
            );
            return Ok(());
        }

        let client = Client::builder().timeout(DOWNLOAD_TIMEOUT).build()?;
        let expected = client
            .get(&self.checksum_url)
            .send()?
            .error_for_status()?
            .text()?;

        info!("download {}", self.download_url);
        let response = client.get(&self.download_url).send()?.error_for_status()?;
        let bar = match response.content_length() {
            Some(length) => ProgressBar::new(length),
            None => ProgressBar::new_spinner(),
        };
        bar.set_style(
            ProgressStyle::with_template("{elapsed_precise:.green}  {msg}  {bytes}/{total_bytes}")?,
        );
        bar.set_message(self.download_url.clone());

        let mut archive = Vec::new();
        copy(&mut bar.wrap_read(response), &mut archive).map_err(|source| InstallError::Io {
            source,
            path: dest_dir.to_path_buf(),
        })?;
        bar.finish_and_clear();

        verify_checksum(&archive, &expected)?;
        unpack(&archive, dest_dir)?;
        info!("unpacked WordPress into {}", dest_dir.display());

        Ok(())
    }

    /// Fill configuration template with database connection values.
    ///
    /// Falls back to a minimal built-in template if none is configured or
    /// the configured one does not exist.
    pub fn render_config(
        &self,
        db_name: &str,
        db_user: &str,
        db_pass: &str,
        db_host: &str,
    ) -> Result<String> {
        let template = match &self.config_template {
            Some(path) if path.exists() => {
                read_to_string(path).map_err(|source| InstallError::Io {
                    source,
                    path: path.clone(),
                })?
            }
            _ => DEFAULT_CONFIG_TEMPLATE.to_string(),
        };

        Ok(template
            .replace("{db_name}", db_name)
            .replace("{db_user}", db_user)
            .replace("{db_pass}", db_pass)
            .replace("{db_host}", db_host))
    }
}

impl Installer for WordPress {
    #[instrument(skip(self, database), level = "debug")]
    fn install(&self, site_root: &Path, database: &Credentials, db_host: &str) -> Result<()> {
        self.download(site_root)?;

        let config_path = site_root.join(CONFIG_FILE);
        let contents =
            self.render_config(&database.name, &database.user, &database.password, db_host)?;
        if self.dry_run {
            info!("[dry-run] would write {}", config_path.display());
            return Ok(());
        }

        write(&config_path, contents).map_err(|source| InstallError::Io {
            source,
            path: config_path.clone(),
        })?;
        normalize_permissions(site_root)?;
        info!("WordPress installed at {}", site_root.display());

        Ok(())
    }
}

/// Compare archive digest with published checksum text.
///
/// Checksum files may carry a trailing file name after the digest, so only
/// the first whitespace-separated token is compared.
pub fn verify_checksum(archive: &[u8], published: &str) -> Result<()> {
    let expected = published
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();
    let actual = format!("{:x}", Sha1::digest(archive));
    if expected != actual {
        return Err(InstallError::Checksum { expected, actual });
    }

    debug!("archive checksum {actual} verified");
    Ok(())
}

/// Unpack gzipped tarball into `dest_dir`, flattening a single wrapper
/// directory.
///
/// Existing entries in `dest_dir` with the same name as unpacked entries are
/// replaced.
pub fn unpack(archive: &[u8], dest_dir: &Path) -> Result<()> {
    let io_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| InstallError::Io { source, path }
    };

    mkdirp::mkdirp(dest_dir).map_err(io_error(dest_dir))?;
    let staging = tempfile::Builder::new()
        .prefix(".franken-unpack-")
        .tempdir_in(dest_dir)
        .map_err(io_error(dest_dir))?;
    Archive::new(GzDecoder::new(archive))
        .unpack(staging.path())
        .map_err(io_error(staging.path()))?;

    // INVARIANT: A lone top-level directory is a wrapper to flatten away.
    let top = read_dir(staging.path())
        .map_err(io_error(staging.path()))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(io_error(staging.path()))?;
    let source_dir = match top.as_slice() {
        [only] if only.path().is_dir() => only.path(),
        _ => staging.path().to_path_buf(),
    };

    for entry in read_dir(&source_dir).map_err(io_error(&source_dir))? {
        let entry = entry.map_err(io_error(&source_dir))?;
        let target = dest_dir.join(entry.file_name());
        if target.is_dir() {
            remove_dir_all(&target).map_err(io_error(&target))?;
        } else if target.exists() {
            remove_file(&target).map_err(io_error(&target))?;
        }
        rename(entry.path(), &target).map_err(io_error(&target))?;
    }

    Ok(())
}

/// Set directories to `0755` and files to `0644` across a tree.
pub fn normalize_permissions(root: &Path) -> Result<()> {
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .build();

    for entry in walker {
        let entry = entry?;
        let Some(file_type) = entry.file_type() else {
            continue;
        };

        let mode = if file_type.is_dir() {
            0o755
        } else if file_type.is_file() {
            0o644
        } else {
            continue;
        };

        set_permissions(entry.path(), Permissions::from_mode(mode)).map_err(|source| {
            InstallError::Io {
                source,
                path: entry.path().to_path_buf(),
            }
        })?;
    }

    Ok(())
}

/// Application installation error types.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// Download failed or timed out.
    #[error("download failed")]
    Network(#[from] reqwest::Error),

    /// Downloaded archive does not match its published checksum.
    #[error("archive checksum mismatch: expected {expected:?}, got {actual:?}")]
    Checksum { expected: String, actual: String },

    /// Filesystem operation failed.
    #[error("failed to install into {path:?}")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Site tree could not be walked.
    #[error(transparent)]
    Walk(#[from] ignore::Error),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = InstallError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression};
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::{fs::metadata, os::unix::fs::PermissionsExt};

    fn tarball(entries: &[(&str, &str)]) -> anyhow::Result<Vec<u8>> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
        for (path, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o600);
            header.set_cksum();
            builder.append_data(&mut header, path, contents.as_bytes())?;
        }

        Ok(builder.into_inner()?.finish()?)
    }

    #[test]
    fn render_default_config() -> anyhow::Result<()> {
        let installer = WordPress::new(&Settings::default(), true);
        let result = installer.render_config("blog", "blog_user", "s3cret", "localhost")?;
        let expect = indoc! {"
            <?php
            define('DB_NAME', 'blog');
            define('DB_USER', 'blog_user');
            define('DB_PASSWORD', 's3cret');
            define('DB_HOST', 'localhost');
        "};
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn render_config_from_template() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let template = dir.path().join("wp-config.tpl");
        write(&template, "name={db_name} host={db_host}\n")?;

        let mut settings = Settings::default();
        settings.wordpress.config_template = Some(template);
        let installer = WordPress::new(&settings, true);
        let result = installer.render_config("blog", "u", "p", "db.local")?;
        assert_eq!(result, "name=blog host=db.local\n");

        Ok(())
    }

    #[test]
    fn checksum_accepts_matching_digest() -> anyhow::Result<()> {
        // SHA-1 of "abc".
        verify_checksum(b"abc", "A9993E364706816ABA3E25717850C26C9CD0D89D  latest.tar.gz\n")?;
        Ok(())
    }

    #[test]
    fn checksum_rejects_mismatch() {
        let result = verify_checksum(b"abc", "0000000000000000000000000000000000000000");
        assert!(matches!(result, Err(InstallError::Checksum { .. })));

        let result = verify_checksum(b"abc", "");
        assert!(matches!(result, Err(InstallError::Checksum { .. })));
    }

    #[test]
    fn unpack_flattens_wrapper_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("example.com");
        let archive = tarball(&[
            ("wordpress/index.php", "<?php // index"),
            ("wordpress/wp-admin/admin.php", "<?php // admin"),
        ])?;

        unpack(&archive, &root)?;

        assert_eq!(read_to_string(root.join("index.php"))?, "<?php // index");
        assert!(root.join("wp-admin").join("admin.php").exists());
        assert!(!root.join("wordpress").exists());
        assert_eq!(read_dir(&root)?.count(), 2);

        Ok(())
    }

    #[test]
    fn unpack_replaces_existing_entries() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("wp-admin"))?;
        write(root.join("wp-admin").join("stale.php"), "old")?;
        write(root.join("index.php"), "old")?;

        let archive = tarball(&[
            ("wordpress/index.php", "new"),
            ("wordpress/wp-admin/admin.php", "new"),
        ])?;
        unpack(&archive, &root)?;

        assert_eq!(read_to_string(root.join("index.php"))?, "new");
        assert!(!root.join("wp-admin").join("stale.php").exists());

        Ok(())
    }

    #[test]
    fn unpack_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let result = unpack(b"definitely not gzip", dir.path());
        assert!(matches!(result, Err(InstallError::Io { .. })));
    }

    #[test]
    fn permissions_are_normalized() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("site");
        unpack(
            &tarball(&[("wordpress/.htaccess", "x"), ("wordpress/wp-includes/a.php", "x")])?,
            &root,
        )?;

        normalize_permissions(&root)?;

        let mode = |path: PathBuf| metadata(path).map(|meta| meta.permissions().mode() & 0o777);
        assert_eq!(mode(root.clone())?, 0o755);
        assert_eq!(mode(root.join("wp-includes"))?, 0o755);
        assert_eq!(mode(root.join("wp-includes").join("a.php"))?, 0o644);
        assert_eq!(mode(root.join(".htaccess"))?, 0o644);

        Ok(())
    }

    #[test]
    fn dry_run_install_touches_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("example.com");
        let installer = WordPress::new(&Settings::default(), true);
        let database = Credentials {
            name: "example_com".into(),
            user: "example_com".into(),
            password: "pw".into(),
        };

        installer.install(&root, &database, "localhost")?;
        assert!(!root.exists());

        Ok(())
    }
}
