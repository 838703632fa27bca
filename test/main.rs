// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT


use anyhow::Result;
use franken::{
    database::{generate_password, Credentials, DatabaseAdmin, DatabaseError},
    exec::{render_command, CommandRunner, ExecError},
    proxy::{CaddyConfig, ProxyConfig},
    user::{AccountManager, UserError},
    wordpress::{InstallError, Installer, CONFIG_FILE},
    Settings, SiteManager,
};
use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    ffi::OsStr,
    fs::write,
    io,
    path::{Path, PathBuf},
    rc::Rc,
};
use tempfile::TempDir;

/// Injected failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    CreateUser,
    DeleteUser,
    CreateDatabase,
    Install,
    Reload,
}

/// Everything the fakes have done to the outside world.
#[derive(Debug, Default)]
pub(crate) struct World {
    pub databases: BTreeMap<String, Credentials>,
    pub users: BTreeSet<String>,
    pub installs: Vec<PathBuf>,
    pub chowns: Vec<(PathBuf, String)>,
    pub commands: Vec<String>,
    faults: Vec<Fault>,
}

impl World {
    // INVARIANT: A fault fires once, then it is gone.
    fn trip(&mut self, fault: Fault) -> bool {
        match self.faults.iter().position(|armed| *armed == fault) {
            Some(index) => {
                self.faults.remove(index);
                true
            }
            None => false,
        }
    }
}

pub(crate) type SharedWorld = Rc<RefCell<World>>;

pub(crate) type TestManager =
    SiteManager<FakeDatabase, FakeAccounts, CaddyConfig<FakeRunner>, FakeInstaller>;

pub(crate) struct FakeDatabase {
    world: SharedWorld,
    dry_run: bool,
}

impl DatabaseAdmin for FakeDatabase {
    fn create(
        &self,
        name: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> franken::database::Result<Credentials> {
        if self.world.borrow_mut().trip(Fault::CreateDatabase) {
            return Err(DatabaseError::Driver(mysql::Error::IoError(io::Error::other(
                "connection refused",
            ))));
        }

        let credentials = Credentials {
            name: name.into(),
            user: user.unwrap_or(name).into(),
            password: password.map_or_else(|| generate_password(32), String::from),
        };
        if !self.dry_run {
            self.world
                .borrow_mut()
                .databases
                .insert(name.into(), credentials.clone());
        }

        Ok(credentials)
    }

    fn delete(&self, name: &str, _user: Option<&str>) -> franken::database::Result<()> {
        if !self.dry_run {
            self.world.borrow_mut().databases.remove(name);
        }

        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.world.borrow().databases.contains_key(name)
    }
}

pub(crate) struct FakeAccounts {
    world: SharedWorld,
    dry_run: bool,
}

fn command_failed(command: &str) -> ExecError {
    ExecError::Spawn {
        command: command.into(),
        source: io::Error::other("permission denied"),
    }
}

impl AccountManager for FakeAccounts {
    fn create(&self, username: &str, _home: Option<&Path>) -> franken::user::Result<()> {
        let mut world = self.world.borrow_mut();
        if world.trip(Fault::CreateUser) || world.users.contains(username) {
            return Err(UserError::Command(command_failed("useradd")));
        }

        if !self.dry_run {
            world.users.insert(username.into());
        }

        Ok(())
    }

    fn delete(&self, username: &str, _remove_home: bool) -> franken::user::Result<()> {
        let mut world = self.world.borrow_mut();
        if world.trip(Fault::DeleteUser) || !world.users.contains(username) {
            return Err(UserError::Command(command_failed("userdel")));
        }

        if !self.dry_run {
            world.users.remove(username);
        }

        Ok(())
    }

    fn exists(&self, username: &str) -> bool {
        self.world.borrow().users.contains(username)
    }

    fn chown_recursive(&self, path: &Path, username: &str) -> franken::user::Result<()> {
        if !self.dry_run {
            self.world
                .borrow_mut()
                .chowns
                .push((path.to_path_buf(), username.into()));
        }

        Ok(())
    }
}

pub(crate) struct FakeInstaller {
    world: SharedWorld,
    dry_run: bool,
}

impl Installer for FakeInstaller {
    fn install(
        &self,
        site_root: &Path,
        database: &Credentials,
        _db_host: &str,
    ) -> franken::wordpress::Result<()> {
        if self.world.borrow_mut().trip(Fault::Install) {
            return Err(InstallError::Checksum {
                expected: "abc".into(),
                actual: "def".into(),
            });
        }

        if self.dry_run {
            return Ok(());
        }

        let io_error = |source| InstallError::Io {
            source,
            path: site_root.to_path_buf(),
        };
        write(site_root.join("index.php"), "<?php\n").map_err(io_error)?;
        write(
            site_root.join(CONFIG_FILE),
            format!("<?php define('DB_NAME', '{}');\n", database.name),
        )
        .map_err(io_error)?;
        self.world.borrow_mut().installs.push(site_root.to_path_buf());

        Ok(())
    }
}

pub(crate) struct FakeRunner {
    world: SharedWorld,
    dry_run: bool,
}

impl CommandRunner for FakeRunner {
    fn run(&self, program: &str, args: &[&OsStr]) -> franken::exec::Result<String> {
        let command = render_command(program, args);
        let mut world = self.world.borrow_mut();
        if world.trip(Fault::Reload) {
            return Err(command_failed(&command));
        }

        if !self.dry_run {
            world.commands.push(command);
        }

        Ok(String::new())
    }

    fn probe(&self, _program: &str, _args: &[&OsStr]) -> bool {
        true
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

/// Sandbox with settings rooted in a temporary directory.
pub(crate) struct Harness {
    _root: TempDir,
    pub settings: Settings,
    pub world: SharedWorld,
}

impl Harness {
    pub(crate) fn new() -> Result<Self> {
        let root = tempfile::tempdir()?;
        let mut settings = Settings::default();
        settings.paths.state_file = root.path().join("state").join("state.json");
        settings.paths.web_root = root.path().join("www");
        settings.paths.proxy_config_dir = root.path().join("sites.d");
        settings.paths.home_base = root.path().join("home");
        settings.proxy.reload_command = vec!["caddy".into(), "reload".into()];

        Ok(Self {
            _root: root,
            settings,
            world: SharedWorld::default(),
        })
    }

    pub(crate) fn manager(&self, dry_run: bool) -> TestManager {
        SiteManager::new(
            &self.settings,
            FakeDatabase {
                world: self.world.clone(),
                dry_run,
            },
            FakeAccounts {
                world: self.world.clone(),
                dry_run,
            },
            CaddyConfig::new(
                &self.settings,
                FakeRunner {
                    world: self.world.clone(),
                    dry_run,
                },
            ),
            FakeInstaller {
                world: self.world.clone(),
                dry_run,
            },
            dry_run,
        )
    }

    pub(crate) fn arm(&self, fault: Fault) {
        self.world.borrow_mut().faults.push(fault);
    }

    pub(crate) fn site_root(&self, domain: &str) -> PathBuf {
        self.settings.site_root(domain)
    }

    pub(crate) fn proxy_file(&self, domain: &str) -> PathBuf {
        CaddyConfig::new(
            &self.settings,
            FakeRunner {
                world: self.world.clone(),
                dry_run: true,
            },
        )
        .config_path(domain)
    }
}
