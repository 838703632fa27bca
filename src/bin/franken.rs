// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use franken::{
    database::{DatabaseAdmin, MysqlAdmin},
    exec::SystemRunner,
    user::{AccountManager, SystemAccounts},
    validate::ensure_identifier,
    AddSite, App, Settings, SiteManager, SiteRecord,
};

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use inquire::Confirm;
use std::{path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "franken [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to settings file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Log debug output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let settings = Settings::load(self.config.as_deref())?;
        match self.command {
            Command::Site { command } => match command {
                SiteCommand::Add(opts) => run_site_add(&settings, opts),
                SiteCommand::Delete(opts) => run_site_delete(&settings, opts),
                SiteCommand::List => run_site_list(&settings),
                SiteCommand::Info(opts) => run_site_info(&settings, opts),
            },
            Command::Db { command } => match command {
                DbCommand::Create(opts) => run_db_create(&settings, opts),
                DbCommand::Delete(opts) => run_db_delete(&settings, opts),
            },
            Command::Wordpress { command } => match command {
                WordPressCommand::Install(opts) => run_wordpress_install(&settings, opts),
            },
            Command::User { command } => match command {
                UserCommand::Create(opts) => run_user_create(&settings, opts),
                UserCommand::Delete(opts) => run_user_delete(&settings, opts),
            },
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Manage sites.
    #[command(override_usage = "franken site <command>")]
    Site {
        #[command(subcommand)]
        command: SiteCommand,
    },

    /// Manage databases.
    #[command(override_usage = "franken db <command>")]
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },

    /// Manage WordPress installs.
    #[command(override_usage = "franken wordpress <command>")]
    Wordpress {
        #[command(subcommand)]
        command: WordPressCommand,
    },

    /// Manage OS users.
    #[command(override_usage = "franken user <command>")]
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
}

#[derive(Debug, Clone, Subcommand)]
enum SiteCommand {
    /// Add site with optional aliases and application.
    #[command(override_usage = "franken site add [options] <domain> [<alias>]...")]
    Add(SiteAddOptions),

    /// Delete site with its directory, database, user, and proxy config.
    #[command(override_usage = "franken site delete [options] <domain>")]
    Delete(SiteDeleteOptions),

    /// List managed sites.
    List,

    /// Show details of one site.
    #[command(override_usage = "franken site info <domain>")]
    Info(SiteInfoOptions),
}

#[derive(Debug, Clone, Subcommand)]
enum DbCommand {
    /// Create database and user with generated password.
    Create(NameOptions),

    /// Delete database and its user.
    Delete(NameOptions),
}

#[derive(Debug, Clone, Subcommand)]
enum WordPressCommand {
    /// Install WordPress into existing site.
    Install(DomainOptions),
}

#[derive(Debug, Clone, Subcommand)]
enum UserCommand {
    /// Create OS user.
    Create(NameOptions),

    /// Delete OS user and home directory.
    Delete(NameOptions),
}

#[derive(Args, Clone, Debug)]
struct SiteAddOptions {
    /// Primary domain followed by optional aliases.
    #[arg(required = true, value_name = "domain")]
    pub domains: Vec<String>,

    /// Additional aliases, comma separated.
    #[arg(short, long, value_delimiter = ',', value_name = "domain")]
    pub aliases: Vec<String>,

    /// Application to install.
    #[arg(short = 'A', long, value_name = "app")]
    pub app: Option<App>,

    /// PHP version label.
    #[arg(short, long, value_name = "version")]
    pub php: Option<String>,

    /// Create OS user owning the site.
    #[arg(short, long)]
    pub user: bool,

    /// Re-provision existing site.
    #[arg(short, long)]
    pub force: bool,

    /// Show what would happen without doing it.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Clone, Debug)]
struct SiteDeleteOptions {
    /// Primary domain of site to delete.
    #[arg(value_name = "domain")]
    pub domain: String,

    /// Skip confirmation prompt.
    #[arg(short, long)]
    pub yes: bool,

    /// Show what would happen without doing it.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Clone, Debug)]
struct SiteInfoOptions {
    /// Primary domain of site.
    #[arg(value_name = "domain")]
    pub domain: String,
}

#[derive(Args, Clone, Debug)]
struct DomainOptions {
    /// Primary domain of site.
    #[arg(value_name = "domain")]
    pub domain: String,

    /// Show what would happen without doing it.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Clone, Debug)]
struct NameOptions {
    /// Identifier to operate on.
    #[arg(value_name = "name")]
    pub name: String,

    /// Show what would happen without doing it.
    #[arg(long)]
    pub dry_run: bool,
}

fn main() {
    let cli = Cli::parse();

    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr);
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = cli.run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run_site_add(settings: &Settings, opts: SiteAddOptions) -> Result<()> {
    let mut domains = opts.domains.into_iter();
    let primary = domains
        .next()
        .ok_or_else(|| anyhow!("at least one domain is required"))?;
    let options = AddSite {
        aliases: domains.chain(opts.aliases).collect(),
        app: opts.app,
        php_version: opts.php,
        create_user: opts.user,
        force: opts.force,
    };

    info!("adding site {primary}");
    let manager = SiteManager::system(settings, opts.dry_run);
    let record = manager.add(&primary, &options)?;
    if opts.dry_run {
        println!("[dry-run] site add completed, no changes made");
        return Ok(());
    }

    println!("Site added.");
    print_record(&record);

    Ok(())
}

fn run_site_delete(settings: &Settings, opts: SiteDeleteOptions) -> Result<()> {
    if !opts.yes && !opts.dry_run {
        let confirmed = Confirm::new(&format!(
            "Delete {} with its files, database, and proxy config?",
            opts.domain
        ))
        .with_default(false)
        .prompt()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    info!("deleting site {}", opts.domain);
    SiteManager::system(settings, opts.dry_run).delete(&opts.domain)?;
    if opts.dry_run {
        println!("[dry-run] site delete completed, no changes made");
    } else {
        println!("Site deleted.");
    }

    Ok(())
}

fn run_site_list(settings: &Settings) -> Result<()> {
    let sites = SiteManager::system(settings, false).list();
    if sites.is_empty() {
        println!("No sites found.");
        return Ok(());
    }

    for site in sites {
        println!("  {}  {}", site.primary_domain, site.aliases.join(", "));
    }

    Ok(())
}

fn run_site_info(settings: &Settings, opts: SiteInfoOptions) -> Result<()> {
    let manager = SiteManager::system(settings, false);
    let record = manager
        .info(&opts.domain)
        .ok_or_else(|| anyhow!("site not found: {}", opts.domain))?;

    print_record(&record);
    match manager.database_present(&record) {
        Some(true) => println!("  Database present on server."),
        Some(false) => println!("  Database missing on server."),
        None => {}
    }

    Ok(())
}

fn run_db_create(settings: &Settings, opts: NameOptions) -> Result<()> {
    ensure_identifier(&opts.name, "database name")?;
    info!("creating database {}", opts.name);
    let admin = MysqlAdmin::new(
        &settings.database,
        settings.security.password_length,
        opts.dry_run,
    );
    let credentials = admin.create(&opts.name, None, None)?;
    if opts.dry_run {
        println!("[dry-run] database create completed, no changes made");
        return Ok(());
    }

    println!("Database created.");
    println!("  Database: {}", credentials.name);
    println!("  User:     {}", credentials.user);
    println!("  Password: {}", credentials.password);

    Ok(())
}

fn run_db_delete(settings: &Settings, opts: NameOptions) -> Result<()> {
    ensure_identifier(&opts.name, "database name")?;
    info!("deleting database {}", opts.name);
    let admin = MysqlAdmin::new(
        &settings.database,
        settings.security.password_length,
        opts.dry_run,
    );
    admin.delete(&opts.name, Some(&opts.name))?;
    if opts.dry_run {
        println!("[dry-run] database delete completed, no changes made");
    } else {
        println!("Database deleted.");
    }

    Ok(())
}

fn run_wordpress_install(settings: &Settings, opts: DomainOptions) -> Result<()> {
    info!("installing WordPress for {}", opts.domain);
    let manager = SiteManager::system(settings, opts.dry_run);
    let record = manager.install_app(&opts.domain, App::WordPress)?;
    if opts.dry_run {
        println!("[dry-run] WordPress install completed, no changes made");
    } else {
        println!("WordPress installed at {}.", record.path.display());
    }

    Ok(())
}

fn run_user_create(settings: &Settings, opts: NameOptions) -> Result<()> {
    ensure_identifier(&opts.name, "username")?;
    info!("creating user {}", opts.name);
    let accounts = SystemAccounts::new(
        settings.paths.home_base.clone(),
        SystemRunner::new(opts.dry_run),
    );
    accounts.create(&opts.name, None)?;
    if opts.dry_run {
        println!("[dry-run] user create completed, no changes made");
    } else {
        println!("User created.");
    }

    Ok(())
}

fn run_user_delete(settings: &Settings, opts: NameOptions) -> Result<()> {
    ensure_identifier(&opts.name, "username")?;
    info!("deleting user {}", opts.name);
    let accounts = SystemAccounts::new(
        settings.paths.home_base.clone(),
        SystemRunner::new(opts.dry_run),
    );
    accounts.delete(&opts.name, true)?;
    if opts.dry_run {
        println!("[dry-run] user delete completed, no changes made");
    } else {
        println!("User deleted.");
    }

    Ok(())
}

fn print_record(record: &SiteRecord) {
    println!("  Domain:   {}", record.primary_domain);
    if !record.aliases.is_empty() {
        println!("  Aliases:  {}", record.aliases.join(", "));
    }
    println!("  Path:     {}", record.path.display());
    println!("  PHP:      {}", record.php_version);
    if let Some(app) = record.app {
        println!("  App:      {app}");
    }
    if let Some(name) = &record.db_name {
        println!("  Database: {name}");
    }
    if let Some(user) = &record.linux_user {
        println!("  User:     {user}");
    }
}
