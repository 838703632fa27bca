// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Database provisioning.
//!
//! Each site may own one MySQL/MariaDB database together with a local
//! account that holds every privilege on it. Provisioning runs as the
//! administrative account from [`DatabaseSettings`].
//!
//! Account statements (`CREATE USER`, `GRANT`, `DROP USER`) cannot be
//! prepared by the server, so their SQL text is built on the client.
//! Database names are validated as identifiers and back-quoted. Account names
//! and passwords are rendered as escaped string literals.

use crate::{
    config::DatabaseSettings,
    validate::{ensure_identifier, ValidationError},
};

use mysql::{prelude::Queryable, Conn, Opts, OptsBuilder, Value};
use rand::{seq::SliceRandom, thread_rng};
use tracing::{debug, info, instrument};

/// Characters used for generated passwords.
pub const PASSWORD_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*";

/// Database name, account, and password of a provisioned database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub name: String,
    pub user: String,
    pub password: String,
}

/// Layer of indirection for database administration.
pub trait DatabaseAdmin {
    /// Create database and account with full privileges on it.
    ///
    /// Account name defaults to database name, and a password is generated
    /// when none is given. Creation is idempotent for both database and
    /// account.
    fn create(&self, name: &str, user: Option<&str>, password: Option<&str>)
        -> Result<Credentials>;

    /// Drop database and, if given, its account. Idempotent.
    fn delete(&self, name: &str, user: Option<&str>) -> Result<()>;

    /// Check whether database exists.
    ///
    /// Any failure to ask the server is reported as `false`.
    fn exists(&self, name: &str) -> bool;
}

/// Database administration over the MySQL wire protocol.
#[derive(Debug, Clone)]
pub struct MysqlAdmin {
    settings: DatabaseSettings,
    password_length: usize,
    dry_run: bool,
}

impl MysqlAdmin {
    /// Construct new MySQL administrator.
    pub fn new(settings: &DatabaseSettings, password_length: usize, dry_run: bool) -> Self {
        Self {
            settings: settings.clone(),
            password_length,
            dry_run,
        }
    }

    fn connect(&self) -> Result<Conn> {
        debug!(
            "connect to {} as {}",
            self.settings.host, self.settings.root_user
        );
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(self.settings.host.as_str()))
            .user(Some(self.settings.root_user.as_str()))
            .pass(Some(self.settings.root_password.as_str()));

        Ok(Conn::new(Opts::from(opts))?)
    }
}

impl DatabaseAdmin for MysqlAdmin {
    #[instrument(skip(self, password), level = "debug")]
    fn create(
        &self,
        name: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<Credentials> {
        ensure_identifier(name, "database name")?;
        let user = user.unwrap_or(name);
        ensure_identifier(user, "database user")?;
        let password = match password {
            Some(password) => password.to_string(),
            None => generate_password(self.password_length),
        };

        if self.dry_run {
            info!("[dry-run] would create database {name} and user {user}");
            return Ok(Credentials {
                name: name.into(),
                user: user.into(),
                password,
            });
        }

        let mut conn = self.connect()?;
        conn.query_drop(format!("CREATE DATABASE IF NOT EXISTS {}", quote_identifier(name)))?;
        conn.query_drop(create_user_sql(user, &password))?;
        conn.query_drop(grant_sql(name, user))?;
        conn.query_drop("FLUSH PRIVILEGES")?;

        info!("created database {name} and user {user}");
        Ok(Credentials {
            name: name.into(),
            user: user.into(),
            password,
        })
    }

    #[instrument(skip(self), level = "debug")]
    fn delete(&self, name: &str, user: Option<&str>) -> Result<()> {
        ensure_identifier(name, "database name")?;
        if let Some(user) = user {
            ensure_identifier(user, "database user")?;
        }

        if self.dry_run {
            info!("[dry-run] would drop database {name} and user {user:?}");
            return Ok(());
        }

        let mut conn = self.connect()?;
        conn.query_drop(format!("DROP DATABASE IF EXISTS {}", quote_identifier(name)))?;
        if let Some(user) = user {
            conn.query_drop(drop_user_sql(user))?;
        }
        conn.query_drop("FLUSH PRIVILEGES")?;

        info!("dropped database {name}");
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        let mut conn = match self.connect() {
            Ok(conn) => conn,
            Err(error) => {
                debug!("cannot check database {name}: {error}");
                return false;
            }
        };

        conn.exec_first::<String, _, _>(
            "SELECT SCHEMA_NAME FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = ?",
            (name,),
        )
        .map(|row| row.is_some())
        .unwrap_or(false)
    }
}

/// Generate a random password of given length.
pub fn generate_password(length: usize) -> String {
    let mut rng = thread_rng();
    (0..length)
        .filter_map(|_| PASSWORD_ALPHABET.choose(&mut rng))
        .map(|byte| char::from(*byte))
        .collect()
}

/// Back-quote a validated identifier for use in SQL text.
fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Render string as an escaped SQL literal.
fn quote_literal(value: &str) -> String {
    Value::from(value).as_sql(false)
}

fn account(user: &str) -> String {
    format!("{}@'localhost'", quote_literal(user))
}

fn create_user_sql(user: &str, password: &str) -> String {
    format!(
        "CREATE USER IF NOT EXISTS {} IDENTIFIED BY {}",
        account(user),
        quote_literal(password)
    )
}

fn grant_sql(name: &str, user: &str) -> String {
    format!(
        "GRANT ALL PRIVILEGES ON {}.* TO {}",
        quote_identifier(name),
        account(user)
    )
}

fn drop_user_sql(user: &str) -> String {
    format!("DROP USER IF EXISTS {}", account(user))
}

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Database name or account is not a valid identifier.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Database server rejected an operation.
    #[error("database operation failed")]
    Driver(#[from] mysql::Error),
}

/// Friendly result alias :3
pub type Result<T, E = DatabaseError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn admin(dry_run: bool) -> MysqlAdmin {
        let settings = DatabaseSettings {
            host: "127.0.0.1".into(),
            root_user: "root".into(),
            root_password: String::new(),
        };
        MysqlAdmin::new(&settings, 32, dry_run)
    }

    #[test]
    fn generated_password_uses_alphabet() {
        let password = generate_password(32);
        assert_eq!(password.len(), 32);
        assert!(password.bytes().all(|byte| PASSWORD_ALPHABET.contains(&byte)));
        assert_ne!(password, generate_password(32));
    }

    #[test]
    fn dry_run_create_returns_placeholder() -> anyhow::Result<()> {
        let credentials = admin(true).create("example_com", None, None)?;
        assert_eq!(credentials.name, "example_com");
        assert_eq!(credentials.user, "example_com");
        assert_eq!(credentials.password.len(), 32);

        Ok(())
    }

    #[test]
    fn dry_run_create_keeps_given_password() -> anyhow::Result<()> {
        let credentials = admin(true).create("blog", Some("blog_rw"), Some("pw"))?;
        assert_eq!(
            credentials,
            Credentials {
                name: "blog".into(),
                user: "blog_rw".into(),
                password: "pw".into(),
            }
        );

        Ok(())
    }

    #[test]
    fn create_rejects_bad_identifiers_before_connecting() {
        let result = admin(false).create("bad-name; DROP", None, None);
        assert!(matches!(result, Err(DatabaseError::Validation(_))));

        let result = admin(false).create("good", Some("bad user"), None);
        assert!(matches!(result, Err(DatabaseError::Validation(_))));
    }

    #[test]
    fn delete_rejects_bad_identifiers_before_connecting() {
        let result = admin(false).delete("1abc", None);
        assert!(matches!(result, Err(DatabaseError::Validation(_))));
    }

    #[test]
    fn dry_run_delete_is_noop() -> anyhow::Result<()> {
        admin(true).delete("example_com", Some("example_com"))?;
        Ok(())
    }

    #[test]
    fn quote_identifier_escapes_backticks() {
        assert_eq!(quote_identifier("plain"), "`plain`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn account_statements_escape_literals() {
        assert_eq!(
            create_user_sql("blog", r"pa'ss\word"),
            r"CREATE USER IF NOT EXISTS 'blog'@'localhost' IDENTIFIED BY 'pa\'ss\\word'"
        );
        assert_eq!(
            grant_sql("example_com", "example_com"),
            "GRANT ALL PRIVILEGES ON `example_com`.* TO 'example_com'@'localhost'"
        );
        assert_eq!(
            drop_user_sql("example_com"),
            "DROP USER IF EXISTS 'example_com'@'localhost'"
        );
    }
}
