// tests/recipe_loading.rs

//! Recipe loading through the ports tree: normalization, defaults and
//! grammar errors as they appear from on-disk files.

mod common;

use common::Fixture;
use porg::{Error, Recipe};

#[test]
fn single_source_and_sources_list_normalize_identically() {
    let f = Fixture::new();
    f.add_recipe(
        "zlib",
        "1.3.1",
        "source: https://zlib.net/zlib-1.3.1.tar.gz\nsha256: feedc0de\n",
    );
    f.add_recipe(
        "bzip2",
        "1.0.8",
        "sources:\n  - url: https://sourceware.org/pub/bzip2/bzip2-1.0.8.tar.gz\n    sha256: cafe\n",
    );

    let ports = f.ports();
    let zlib = ports.find("zlib").unwrap();
    let bzip2 = ports.find("bzip2").unwrap();
    assert_eq!(zlib.sources.len(), 1);
    assert_eq!(zlib.sources[0].checksum.as_deref(), Some("feedc0de"));
    assert_eq!(bzip2.sources.len(), 1);
    assert_eq!(bzip2.sources[0].checksum.as_deref(), Some("cafe"));
}

#[test]
fn filename_supplies_missing_name() {
    let f = Fixture::new();
    let dir = f.config.ports_dir.join("main/mystery");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("mystery-3.4.yaml"), "prefix: /opt/mystery\n").unwrap();

    let recipe = Recipe::load(&dir.join("mystery-3.4.yaml")).unwrap();
    assert_eq!(recipe.name, "mystery");
    assert_eq!(recipe.version, "0.0.0");
    assert_eq!(recipe.prefix, "/opt/mystery");
}

#[test]
fn grammar_violation_reports_line_and_column() {
    let f = Fixture::new();
    let dir = f.config.ports_dir.join("main/broken");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("broken-1.yaml"), "name: broken\n!!!\n").unwrap();

    match Recipe::load(&dir.join("broken-1.yaml")) {
        Err(Error::ParseError { line, column, .. }) => {
            assert_eq!(line, 2);
            assert_eq!(column, 1);
        }
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn build_blocks_preserve_newlines() {
    let f = Fixture::new();
    f.add_recipe(
        "multi",
        "1.0",
        "build: |\n  ./configure --prefix=/usr\n  make -j\"$JOBS\"\n  make check\n",
    );
    let recipe = f.ports().find("multi").unwrap();
    let block = recipe.build.unwrap();
    assert_eq!(block.lines().count(), 3);
    assert!(block.contains("make -j\"$JOBS\""));
}

#[test]
fn hooks_and_dependency_sets_survive_loading() {
    let f = Fixture::new();
    f.add_recipe(
        "svc",
        "2.0",
        "dependencies:\n  build:\n    - cmake\n  runtime:\n    - libressl\n  optional:\n    - pam\nhooks:\n  post-install:\n    - ldconfig\n  pre-remove:\n    - svc-stop --now\n",
    );
    let recipe = f.ports().find("svc").unwrap();
    assert_eq!(recipe.dependencies.build, vec!["cmake"]);
    assert_eq!(recipe.dependencies.runtime, vec!["libressl"]);
    assert_eq!(recipe.dependencies.optional, vec!["pam"]);
    assert_eq!(recipe.hooks_for("pre-remove"), ["svc-stop --now"]);
    assert!(recipe.hooks_for("post-remove").is_empty());
}

#[test]
fn unknown_keys_are_not_an_error() {
    let f = Fixture::new();
    f.add_recipe("odd", "1.0", "maintainer: someone@example.org\nlicense: MIT\n");
    let recipe = f.ports().find("odd").unwrap();
    assert_eq!(recipe.extra.get("license").map(String::as_str), Some("MIT"));
}
