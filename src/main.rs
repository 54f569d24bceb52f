// src/main.rs

//! Porg CLI entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;

use commands::audit::AuditFlags;
use commands::bootstrap::BootstrapAction;
use commands::resolve::ResolveFlags;
use commands::upgrade::UpgradeFlags;
use commands::Context;

/// Set by the signal handler so exit-code mapping can report 130
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "porg")]
#[command(version)]
#[command(about = "Source-based package manager", long_about = None)]
struct Cli {
    /// Alternate configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Suppress non-error terminal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve, build and register packages
    Install {
        /// Packages to install
        #[arg(required = true)]
        packages: Vec<String>,

        /// Compute and print the plan without building
        #[arg(long)]
        dry_run: bool,

        /// Skip confirmations
        #[arg(short, long)]
        yes: bool,

        /// Build up to N independent packages concurrently
        /// (defaults to PARALLEL_N from the config)
        #[arg(long)]
        parallel: Option<usize>,
    },

    /// Uninstall packages
    Remove {
        #[arg(required = true)]
        packages: Vec<String>,

        /// Remove even with dependents or unsafe prefixes
        #[arg(short, long)]
        force: bool,

        /// Also remove orphans the removal creates
        #[arg(short, long)]
        recursive: bool,

        /// Decide and report without mutating anything
        #[arg(long)]
        dry_run: bool,

        #[arg(short, long)]
        yes: bool,
    },

    /// Plan and execute upgrades
    Upgrade {
        /// Upgrade a single package (with its dependents)
        #[arg(long)]
        pkg: Option<String>,

        /// Upgrade everything (the default scope)
        #[arg(long)]
        world: bool,

        /// Print the plan and exit (1 when rebuilds are pending)
        #[arg(long)]
        check: bool,

        /// Sync the ports tree first
        #[arg(long)]
        sync: bool,

        /// Continue a previously interrupted run
        #[arg(long)]
        resume: bool,

        /// Revdep scan after upgrading
        #[arg(long)]
        revdep: bool,

        /// Clean orphans after upgrading
        #[arg(long)]
        clean: bool,

        #[arg(long)]
        parallel: Option<usize>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Revdep/depclean scans and resolver queries
    Resolve {
        /// Print the dependency order (or graph) of one package
        package: Option<String>,

        /// With a package: print `from -> to` edges instead of the order
        #[arg(long)]
        graph: bool,

        /// Scan for binaries with unresolved shared libraries
        #[arg(long)]
        scan: bool,

        /// Rebuild broken packages
        #[arg(long)]
        fix: bool,

        /// Remove orphan packages
        #[arg(long)]
        clean: bool,

        /// All scans
        #[arg(long)]
        all: bool,

        #[arg(long)]
        parallel: Option<usize>,

        #[arg(long)]
        dry_run: bool,

        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },

    /// Full system audit with a JSON report
    Audit {
        #[arg(long)]
        scan: bool,

        #[arg(long)]
        fix: bool,

        #[arg(long)]
        clean: bool,

        /// Produce the collated report (the default)
        #[arg(long)]
        audit: bool,

        /// Report packages needing rebuilds
        #[arg(long)]
        rebuild_needed: bool,

        #[arg(long)]
        all: bool,

        #[arg(long)]
        json: bool,

        #[arg(long)]
        dry_run: bool,
    },

    /// LFS-style system bootstrap
    Bootstrap {
        #[command(subcommand)]
        action: BootstrapCommands,

        /// Alternate bootstrap manifest
        #[arg(long, global = true)]
        manifest: Option<PathBuf>,
    },

    /// Update the ports tree
    Sync,
}

#[derive(Subcommand)]
enum BootstrapCommands {
    /// Create the bootstrap root skeleton
    Prepare,
    /// List manifest phases in order
    List,
    /// Report per-phase status
    Verify,
    /// Re-run one phase unconditionally
    Rebuild { phase: String },
    /// Build all phases
    Build {
        #[arg(long)]
        dry: bool,
    },
    /// Continue at the first non-success phase
    Resume,
    /// Open a shell inside the bootstrap root
    Enter,
    /// Delegate image generation
    Iso,
    /// Clear per-phase state
    Clean,
    /// Prepare then build everything
    Full,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    install_signal_handlers();

    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            if INTERRUPTED.load(Ordering::SeqCst) {
                130
            } else {
                e.downcast_ref::<porg::Error>()
                    .map(porg::Error::exit_code)
                    .unwrap_or(2)
            }
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let ctx = Context::open(cli.config, cli.quiet)?;
    match cli.command {
        Commands::Install {
            packages,
            dry_run,
            yes,
            parallel,
        } => {
            let parallel = parallel.unwrap_or(ctx.config.parallel_n);
            commands::install::cmd_install(&ctx, &packages, dry_run, yes, parallel, cli.quiet)
        }
        Commands::Remove {
            packages,
            force,
            recursive,
            dry_run,
            yes,
        } => commands::remove::cmd_remove(&ctx, &packages, force, recursive, dry_run, yes),
        Commands::Upgrade {
            pkg,
            world,
            check,
            sync,
            resume,
            revdep,
            clean,
            parallel,
            dry_run,
        } => commands::upgrade::cmd_upgrade(
            &ctx,
            &UpgradeFlags {
                package: pkg,
                world,
                check,
                sync,
                resume,
                revdep,
                clean,
                parallel: parallel.unwrap_or(ctx.config.parallel_n),
                dry_run,
                quiet: cli.quiet,
            },
        ),
        Commands::Resolve {
            package,
            graph,
            scan,
            fix,
            clean,
            all,
            parallel,
            dry_run,
            json,
        } => commands::resolve::cmd_resolve(
            &ctx,
            &ResolveFlags {
                package,
                graph,
                scan,
                fix,
                clean,
                all,
                parallel: parallel.unwrap_or(ctx.config.parallel_n),
                dry_run,
                json,
                quiet: cli.quiet,
            },
        ),
        Commands::Audit {
            scan,
            fix,
            clean,
            audit,
            rebuild_needed,
            all,
            json,
            dry_run,
        } => commands::audit::cmd_audit(
            &ctx,
            &AuditFlags {
                scan,
                fix,
                clean,
                audit,
                rebuild_needed,
                all,
                json,
                dry_run,
                quiet: cli.quiet,
            },
        ),
        Commands::Bootstrap { action, manifest } => {
            let action = match action {
                BootstrapCommands::Prepare => BootstrapAction::Prepare,
                BootstrapCommands::List => BootstrapAction::List,
                BootstrapCommands::Verify => BootstrapAction::Verify,
                BootstrapCommands::Rebuild { phase } => BootstrapAction::Rebuild(phase),
                BootstrapCommands::Build { dry } => BootstrapAction::Build { dry },
                BootstrapCommands::Resume => BootstrapAction::Resume,
                BootstrapCommands::Enter => BootstrapAction::Enter,
                BootstrapCommands::Iso => BootstrapAction::Iso,
                BootstrapCommands::Clean => BootstrapAction::Clean,
                BootstrapCommands::Full => BootstrapAction::Full,
            };
            commands::bootstrap::cmd_bootstrap(&ctx, action, manifest)
        }
        Commands::Sync => commands::cmd_sync(&ctx),
    }
}

/// SIGINT/SIGTERM mark the run interrupted; in-flight children receive the
/// signal through the shared process group, errors propagate up through
/// the normal paths (persisting session state on the way), and the final
/// exit code becomes 130.
fn install_signal_handlers() {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    extern "C" fn on_signal(_: i32) {
        INTERRUPTED.store(true, Ordering::SeqCst);
    }

    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        let _ = sigaction(Signal::SIGINT, &action);
        let _ = sigaction(Signal::SIGTERM, &action);
    }
}
