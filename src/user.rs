// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! OS account management.

use crate::{
    exec::{CommandRunner, ExecError},
    validate::{ensure_identifier, ValidationError},
};

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

/// Layer of indirection for OS account management.
pub trait AccountManager {
    /// Create account whose home directory is `home`.
    ///
    /// When `home` is `None` the account gets a home under the configured
    /// home base.
    fn create(&self, username: &str, home: Option<&Path>) -> Result<()>;

    /// Remove account, optionally purging its home directory.
    ///
    /// Removing an account that does not exist is an error.
    fn delete(&self, username: &str, remove_home: bool) -> Result<()>;

    /// Check whether account exists.
    fn exists(&self, username: &str) -> bool;

    /// Hand ownership of a tree to an account.
    fn chown_recursive(&self, path: &Path, username: &str) -> Result<()>;
}

/// Account management through shadow-utils commands.
#[derive(Debug, Clone)]
pub struct SystemAccounts<R>
where
    R: CommandRunner,
{
    home_base: PathBuf,
    runner: R,
}

impl<R> SystemAccounts<R>
where
    R: CommandRunner,
{
    /// Construct new account manager.
    pub fn new(home_base: impl Into<PathBuf>, runner: R) -> Self {
        Self {
            home_base: home_base.into(),
            runner,
        }
    }
}

impl<R> AccountManager for SystemAccounts<R>
where
    R: CommandRunner,
{
    #[instrument(skip(self), level = "debug")]
    fn create(&self, username: &str, home: Option<&Path>) -> Result<()> {
        ensure_identifier(username, "username")?;
        let home = match home {
            Some(home) => home.to_path_buf(),
            None => self.home_base.join(username),
        };

        self.runner.run(
            "useradd",
            &[
                OsStr::new("-m"),
                OsStr::new("-d"),
                home.as_os_str(),
                OsStr::new(username),
            ],
        )?;

        if !self.runner.is_dry_run() {
            info!("created user {username} with home {}", home.display());
        }

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn delete(&self, username: &str, remove_home: bool) -> Result<()> {
        ensure_identifier(username, "username")?;
        let mut args = Vec::new();
        if remove_home {
            args.push(OsStr::new("-r"));
        }
        args.push(OsStr::new(username));

        self.runner.run("userdel", &args)?;

        if !self.runner.is_dry_run() {
            info!("deleted user {username}");
        }

        Ok(())
    }

    fn exists(&self, username: &str) -> bool {
        self.runner.probe("id", &[OsStr::new(username)])
    }

    #[instrument(skip(self), level = "debug")]
    fn chown_recursive(&self, path: &Path, username: &str) -> Result<()> {
        ensure_identifier(username, "username")?;
        let owner = format!("{username}:{username}");
        self.runner.run(
            "chown",
            &[OsStr::new("-R"), OsStr::new(&owner), path.as_os_str()],
        )?;

        Ok(())
    }
}

/// OS account error types.
#[derive(Debug, thiserror::Error)]
pub enum UserError {
    /// Username is not a valid identifier.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Account command failed.
    #[error("user command failed")]
    Command(#[from] ExecError),
}

/// Friendly result alias :3
pub type Result<T, E = UserError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::render_command;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    #[derive(Debug, Default)]
    struct RecordingRunner {
        known_users: Vec<String>,
        calls: RefCell<Vec<String>>,
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, program: &str, args: &[&OsStr]) -> crate::exec::Result<String> {
            self.calls.borrow_mut().push(render_command(program, args));
            Ok(String::new())
        }

        fn probe(&self, _program: &str, args: &[&OsStr]) -> bool {
            args.first()
                .is_some_and(|name| self.known_users.iter().any(|user| OsStr::new(user) == *name))
        }

        fn is_dry_run(&self) -> bool {
            false
        }
    }

    #[test]
    fn create_binds_home_directory() -> anyhow::Result<()> {
        let runner = RecordingRunner::default();
        let accounts = SystemAccounts::new("/home", &runner);
        accounts.create("example", Some(Path::new("/var/www/example.com")))?;
        accounts.create("standalone", None)?;

        assert_eq!(
            runner.calls.borrow().as_slice(),
            &[
                "useradd -m -d /var/www/example.com example",
                "useradd -m -d /home/standalone standalone",
            ]
        );

        Ok(())
    }

    #[test]
    fn delete_optionally_removes_home() -> anyhow::Result<()> {
        let runner = RecordingRunner::default();
        let accounts = SystemAccounts::new("/home", &runner);
        accounts.delete("example", true)?;
        accounts.delete("example", false)?;

        assert_eq!(
            runner.calls.borrow().as_slice(),
            &["userdel -r example", "userdel example"]
        );

        Ok(())
    }

    #[test]
    fn invalid_username_never_reaches_runner() {
        let runner = RecordingRunner::default();
        let accounts = SystemAccounts::new("/home", &runner);
        let result = accounts.create("-o root", None);
        assert!(matches!(result, Err(UserError::Validation(_))));
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn exists_probes_identity() {
        let runner = RecordingRunner {
            known_users: vec!["alice".into()],
            ..RecordingRunner::default()
        };
        let accounts = SystemAccounts::new("/home", &runner);
        assert!(accounts.exists("alice"));
        assert!(!accounts.exists("bob"));
    }

    #[test]
    fn chown_uses_matching_group() -> anyhow::Result<()> {
        let runner = RecordingRunner::default();
        let accounts = SystemAccounts::new("/home", &runner);
        accounts.chown_recursive(Path::new("/var/www/example.com"), "example")?;
        assert_eq!(
            runner.calls.borrow().as_slice(),
            &["chown -R example:example /var/www/example.com"]
        );

        Ok(())
    }
}
