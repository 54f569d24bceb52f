// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn dry_run_arg() -> Arg {
    Arg::new("dry_run")
        .long("dry-run")
        .action(ArgAction::SetTrue)
        .help("Compute and report without mutating anything")
}

fn parallel_arg() -> Arg {
    Arg::new("parallel")
        .long("parallel")
        .value_name("N")
        .default_value("1")
        .help("Orchestrator-level parallelism bound")
}

fn build_cli() -> Command {
    Command::new("porg")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Source-based package manager")
        .subcommand(
            Command::new("install")
                .about("Resolve, build and register packages")
                .arg(Arg::new("packages").required(true).num_args(1..).help("Packages to install"))
                .arg(dry_run_arg())
                .arg(Arg::new("yes").short('y').long("yes").action(ArgAction::SetTrue).help("Skip confirmations"))
                .arg(parallel_arg()),
        )
        .subcommand(
            Command::new("remove")
                .about("Uninstall packages")
                .arg(Arg::new("packages").required(true).num_args(1..).help("Packages to remove"))
                .arg(Arg::new("force").short('f').long("force").action(ArgAction::SetTrue).help("Remove even with dependents"))
                .arg(Arg::new("recursive").short('r').long("recursive").action(ArgAction::SetTrue).help("Also remove new orphans"))
                .arg(dry_run_arg()),
        )
        .subcommand(
            Command::new("upgrade")
                .about("Plan and execute upgrades")
                .arg(Arg::new("pkg").long("pkg").value_name("P").help("Single-package scope"))
                .arg(Arg::new("world").long("world").action(ArgAction::SetTrue).help("Whole-system scope"))
                .arg(Arg::new("check").long("check").action(ArgAction::SetTrue).help("Print the plan and exit"))
                .arg(Arg::new("resume").long("resume").action(ArgAction::SetTrue).help("Continue an interrupted run"))
                .arg(parallel_arg())
                .arg(dry_run_arg()),
        )
        .subcommand(
            Command::new("resolve")
                .about("Revdep/depclean scans and resolver queries")
                .arg(Arg::new("package").help("Print the dependency order of one package"))
                .arg(Arg::new("scan").long("scan").action(ArgAction::SetTrue).help("Scan for broken binaries"))
                .arg(Arg::new("fix").long("fix").action(ArgAction::SetTrue).help("Rebuild broken packages"))
                .arg(Arg::new("clean").long("clean").action(ArgAction::SetTrue).help("Remove orphan packages"))
                .arg(Arg::new("json").long("json").action(ArgAction::SetTrue).help("Machine-readable output"))
                .arg(dry_run_arg()),
        )
        .subcommand(
            Command::new("audit")
                .about("Full system audit with a JSON report")
                .arg(Arg::new("json").long("json").action(ArgAction::SetTrue))
                .arg(dry_run_arg()),
        )
        .subcommand(
            Command::new("bootstrap")
                .about("LFS-style system bootstrap")
                .subcommand(Command::new("prepare").about("Create the bootstrap root skeleton"))
                .subcommand(Command::new("build").about("Build all manifest phases"))
                .subcommand(Command::new("resume").about("Continue at the first non-success phase"))
                .subcommand(Command::new("verify").about("Report per-phase status")),
        )
        .subcommand(Command::new("sync").about("Update the ports tree"))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");
    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }
    let man_path = man_dir.join("porg.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
