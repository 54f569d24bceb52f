// tests/build_pipeline.rs

//! End-to-end pipeline runs against file:// sources with a host-side
//! isolation shim: simple install, checkpointed failure plus resume, and
//! the artifact/DB contract.

mod common;

use common::{temp_prefix, Fixture, HostExec};
use porg::build::{artifact_file_list, BuildStage, Session};
use porg::{BuildOptions, Builder};
use std::path::PathBuf;

fn hello_recipe(f: &Fixture, url: &str, digest: &str, prefix: &str, extra_build_line: &str) {
    let body = format!(
        r#"prefix: {prefix}
sources:
  - url: {url}
    sha256: {digest}
build: |
  echo compiled > hello.built
{extra_build_line}install: |
  mkdir -p "$DESTDIR$PKG_PREFIX/bin"
  cp hello "$DESTDIR$PKG_PREFIX/bin/hello"
"#
    );
    f.add_recipe("hello", "2.12", &body);
}

#[test]
fn simple_package_builds_and_registers() {
    let f = Fixture::new();
    let (url, digest) = f.make_source_tarball("hello", "2.12");
    let prefix = temp_prefix(&f, "hello");
    hello_recipe(&f, &url, &digest, &prefix, "");

    let ports = f.ports();
    let recipe = ports.find("hello").unwrap();
    let builder = Builder::new(
        &f.config,
        &f.db,
        BuildOptions {
            quiet: true,
            ..Default::default()
        },
    )
    .with_isolation(Box::new(HostExec));

    let outcome = builder.build(&recipe).unwrap();

    // artifact under the cache, named by key and configured format
    assert!(outcome
        .artifact
        .to_str()
        .unwrap()
        .ends_with("hello-2.12.tar.zst"));
    assert!(outcome.artifact.exists());

    // exactly one record, with the recipe's prefix
    let records = f.db.list().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key(), "hello-2.12");
    assert_eq!(records[0].prefix, prefix);

    // staged file made it into the artifact
    let expected: PathBuf = [prefix.trim_start_matches('/'), "bin/hello"].iter().collect();
    let listed = artifact_file_list(&outcome.artifact).unwrap();
    assert!(listed.contains(&expected), "{expected:?} not in {listed:?}");

    // session state gone after success
    let session = Session::new(&Builder::state_dir(&f.config), "hello-2.12");
    assert!(session.load().unwrap().is_none());
}

#[test]
fn failed_build_checkpoints_and_resume_finishes() {
    let f = Fixture::new();
    let (url, digest) = f.make_source_tarball("hello", "2.12");
    let prefix = temp_prefix(&f, "hello");
    let marker = f.dir.path().join("marker");
    // the build block fails until the marker exists
    hello_recipe(&f, &url, &digest, &prefix, &format!("  test -f {}\n", marker.display()));

    let ports = f.ports();
    let recipe = ports.find("hello").unwrap();
    let builder = Builder::new(
        &f.config,
        &f.db,
        BuildOptions {
            quiet: true,
            ..Default::default()
        },
    )
    .with_isolation(Box::new(HostExec));
    assert!(builder.build(&recipe).is_err());

    // the checkpoint names the failing stage
    let session = Session::new(&Builder::state_dir(&f.config), "hello-2.12");
    let state = session.load().unwrap().unwrap();
    assert_eq!(state.stage, BuildStage::Build);
    assert!(state.failure_reason.is_some());
    assert!(!f.db.is_installed("hello").unwrap());

    // resume must not re-download: remove the source from behind the URL
    std::fs::write(&marker, b"").unwrap();
    std::fs::remove_file(f.dir.path().join("hello-2.12.tar.gz")).unwrap();

    let resumer = Builder::new(
        &f.config,
        &f.db,
        BuildOptions {
            resume: true,
            quiet: true,
            ..Default::default()
        },
    )
    .with_isolation(Box::new(HostExec));
    let outcome = resumer.build(&recipe).unwrap();

    assert!(outcome.artifact.exists());
    assert!(f.db.is_installed("hello").unwrap());
    assert!(session.load().unwrap().is_none());
}

#[test]
fn recipe_with_only_name_and_version_yields_empty_artifact() {
    let f = Fixture::new();
    let prefix = temp_prefix(&f, "empty");
    f.add_recipe("empty", "0.1", &format!("prefix: {prefix}\n"));

    let ports = f.ports();
    let recipe = ports.find("empty").unwrap();
    let builder = Builder::new(
        &f.config,
        &f.db,
        BuildOptions {
            quiet: true,
            ..Default::default()
        },
    )
    .with_isolation(Box::new(HostExec));

    let outcome = builder.build(&recipe).unwrap();
    assert!(outcome.artifact.exists());
    assert_eq!(porg::build::artifact_entry_count(&outcome.artifact).unwrap(), 0);
    assert!(f.db.is_installed("empty").unwrap());
}

#[test]
fn hooks_run_during_pipeline() {
    let f = Fixture::new();
    let (url, digest) = f.make_source_tarball("hello", "2.12");
    let prefix = temp_prefix(&f, "hello");
    let witness = f.dir.path().join("hook-ran");
    let body = format!(
        r#"prefix: {prefix}
sources:
  - url: {url}
    sha256: {digest}
install: |
  mkdir -p "$DESTDIR$PKG_PREFIX/bin"
  cp hello "$DESTDIR$PKG_PREFIX/bin/hello"
hooks:
  post-package:
    - echo "$PKG_NAME" > {witness}
"#,
        witness = witness.display()
    );
    f.add_recipe("hello", "2.12", &body);

    let ports = f.ports();
    let recipe = ports.find("hello").unwrap();
    let builder = Builder::new(
        &f.config,
        &f.db,
        BuildOptions {
            quiet: true,
            ..Default::default()
        },
    )
    .with_isolation(Box::new(HostExec));
    builder.build(&recipe).unwrap();

    assert_eq!(std::fs::read_to_string(&witness).unwrap().trim(), "hello");
}
