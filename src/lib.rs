// src/lib.rs

//! Porg — a source-based package manager
//!
//! Declarative recipes become installable binary artifacts through a
//! sandboxed, resumable build pipeline; system state lives in a single
//! atomic installed-package database.
//!
//! # Architecture
//!
//! - Recipes: declarative files under the ports tree, parsed on demand
//! - Resolver: arena dependency graph with cycle detection and rebuild
//!   analysis
//! - Builder: linear stage machine with per-stage checkpoints for resume
//! - Installed DB: JSON object file, mutated only by atomic rename under
//!   an advisory lock
//! - Orchestrators: upgrade, bootstrap, and audit flows composed from the
//!   pieces above

pub mod audit;
pub mod bootstrap;
pub mod build;
pub mod config;
pub mod db;
mod error;
pub mod logger;
pub mod recipe;
pub mod remove;
pub mod resolver;
pub mod sandbox;
pub mod source;
pub mod sync;
pub mod upgrade;
pub mod version;
pub mod workpool;

pub use build::{BuildOptions, BuildOutcome, BuildStage, Builder, Session};
pub use config::{ChrootMethod, Config, PackageFormat};
pub use db::{InstalledDb, InstalledRecord};
pub use error::{Error, Result};
pub use recipe::{PortsTree, Recipe, RecipeStage, SourceEntry};
pub use remove::{RemoveOptions, Remover};
pub use resolver::{Resolver, UpgradePlan, UpgradeScope};
pub use version::Version;
