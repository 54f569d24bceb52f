// src/commands/mod.rs

//! Command layer: translates CLI flags into core calls
//!
//! Each submodule implements one verb. Commands speak `anyhow` with
//! context strings; the library's typed errors cross over via `?` and are
//! mapped back to exit codes in `main`.

pub mod audit;
pub mod bootstrap;
pub mod install;
pub mod remove;
pub mod resolve;
pub mod upgrade;

use anyhow::{Context as _, Result};
use porg::logger::{Level, SessionLogger};
use porg::{Config, InstalledDb, PortsTree};
use std::path::PathBuf;

/// Shared per-run state handed to every command
pub struct Context {
    pub config: Config,
    pub db: InstalledDb,
    pub ports: PortsTree,
    pub logger: SessionLogger,
}

impl Context {
    /// Load config (explicit path or default), open the session log and
    /// rotate old ones.
    pub fn open(conf: Option<PathBuf>, quiet: bool) -> Result<Self> {
        let config = match conf {
            Some(path) => Config::load(&path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => Config::load_default().context("failed to load /etc/porg/porg.conf")?,
        };

        let logger = SessionLogger::open_with_color(
            &config.log_dir,
            Level::parse(&config.log_level),
            quiet,
            config.log_json,
            config.log_color,
        )
        .context("failed to open session log")?;

        // compressed logs linger four rotation periods before deletion
        let remove_days = config.log_rotate_days.saturating_mul(4);
        if let Err(e) = porg::logger::rotate_logs(&config.log_dir, config.log_rotate_days, remove_days)
        {
            logger.warn(&format!("log rotation failed: {e}"));
        }

        let db = InstalledDb::new(&config.installed_db);
        let ports = PortsTree::new(&config.ports_dir);
        Ok(Self {
            config,
            db,
            ports,
            logger,
        })
    }
}

/// Sync the ports tree (the `sync` verb)
pub fn cmd_sync(ctx: &Context) -> Result<i32> {
    ctx.logger.stage("sync: updating ports tree");
    porg::sync::sync_ports(&ctx.config).context("ports sync failed")?;
    ctx.logger.info("ports tree synchronized");
    Ok(0)
}
