// src/build/mod.rs

//! The sandboxed build pipeline
//!
//! One recipe flows through a linear state machine:
//!
//! ```text
//! download -> verify -> extract -> patch -> build -> install
//!          -> merge -> strip -> package -> [expand-root]
//! ```
//!
//! Each stage persists a session checkpoint before running, so `--resume`
//! re-enters at the stage that was executing when the previous run died.
//! Build and install commands run confined by the selected isolation
//! primitive with `DESTDIR`, `JOBS` and the package identity exported; on
//! success the artifact lands in the cache and the package registers in
//! the installed DB.

mod archive;
mod hooks;
mod package;
mod session;
mod strip;

pub use archive::{apply_patch, extract_archive, source_root};
pub use hooks::HookRunner;
pub use package::{artifact_entry_count, artifact_file_list, extract_artifact, package_staging};
pub use session::{BuildStage, Session, SessionState};
pub use strip::{is_elf, strip_tree};

use crate::config::Config;
use crate::db::{InstalledDb, InstalledRecord};
use crate::error::{Error, Result};
use crate::recipe::Recipe;
use crate::sandbox::{self, Isolation, SandboxSpec};
use crate::source::{verify_checksum, AcquiredSource, SourceAcquirer};
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

/// Flags controlling one build run
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Re-enter a previously failed pipeline at its checkpoint
    pub resume: bool,
    /// Downgrade hook failures to warnings
    pub force: bool,
    /// Skip interactive confirmations (expand-to-root)
    pub auto_yes: bool,
    /// Suppress progress output
    pub quiet: bool,
    /// Skip DB registration (the upgrade swap registers explicitly)
    pub skip_register: bool,
}

/// What a successful build produced
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub artifact: PathBuf,
    pub staging: PathBuf,
    pub record: Option<InstalledRecord>,
}

/// Drives one recipe through the pipeline
pub struct Builder<'a> {
    config: &'a Config,
    db: &'a InstalledDb,
    options: BuildOptions,
    isolation: Option<Box<dyn Isolation>>,
}

struct BuildContext {
    key: String,
    extract_base: PathBuf,
    src_root: Option<PathBuf>,
    sandbox_root: PathBuf,
    staging: PathBuf,
    artifact_dir: PathBuf,
    acquired: Option<AcquiredSource>,
    artifact: Option<PathBuf>,
}

impl<'a> Builder<'a> {
    pub fn new(config: &'a Config, db: &'a InstalledDb, options: BuildOptions) -> Self {
        Self {
            config,
            db,
            options,
            isolation: None,
        }
    }

    /// Inject a specific isolation primitive instead of runtime selection
    pub fn with_isolation(mut self, isolation: Box<dyn Isolation>) -> Self {
        self.isolation = Some(isolation);
        self
    }

    /// State directory holding per-package session checkpoints
    pub fn state_dir(config: &Config) -> PathBuf {
        config.workdir.join("state")
    }

    /// Run the whole pipeline for `recipe`
    pub fn build(&self, recipe: &Recipe) -> Result<BuildOutcome> {
        let key = recipe.key();
        let session = Session::new(&Self::state_dir(self.config), &key);
        let resume_from = if self.options.resume {
            let state = session.load()?;
            if let Some(ref s) = state {
                info!("resuming {} at {}", key, s.stage);
            }
            state.map(|s| s.stage)
        } else {
            None
        };

        let bootstrap = recipe.stage.uses_bootstrap_root();
        let mut ctx = BuildContext {
            extract_base: self.config.workdir.join("build").join(&key).join("src"),
            sandbox_root: self.config.workdir.join("chroot_root").join(&key),
            staging: self.config.stage_base(bootstrap).join(&key),
            artifact_dir: self.config.cache_dir.join("packages"),
            key,
            src_root: None,
            acquired: None,
            artifact: None,
        };

        for &stage in BuildStage::all() {
            if let Some(from) = resume_from {
                if stage < from {
                    continue;
                }
            }
            if stage == BuildStage::ExpandRoot && !recipe.expand_to_root {
                continue;
            }
            session.enter(stage)?;
            info!("[{}] {}", ctx.key, stage);
            if let Err(e) = self.run_stage(stage, recipe, &mut ctx) {
                let _ = session.fail(stage, &e.to_string());
                return Err(e);
            }
        }

        let artifact = ctx
            .artifact
            .clone()
            .or_else(|| self.existing_artifact(&ctx))
            .ok_or_else(|| Error::PackageFailed(format!("{}: no artifact produced", ctx.key)))?;

        let record = if self.options.skip_register {
            None
        } else {
            Some(self.db.register(
                &recipe.name,
                &recipe.version,
                &recipe.prefix,
                recipe.dependencies.runtime.clone(),
                BTreeMap::new(),
            )?)
        };
        session.clear()?;
        info!("built {}", ctx.key);
        Ok(BuildOutcome {
            artifact,
            staging: ctx.staging,
            record,
        })
    }

    fn run_stage(&self, stage: BuildStage, recipe: &Recipe, ctx: &mut BuildContext) -> Result<()> {
        match stage {
            BuildStage::Download => self.stage_download(recipe, ctx),
            BuildStage::Verify => self.stage_verify(recipe, ctx),
            BuildStage::Extract => self.stage_extract(recipe, ctx),
            BuildStage::Patch => self.stage_patch(recipe, ctx),
            BuildStage::Build => self.stage_build(recipe, ctx),
            BuildStage::Install => self.stage_install(recipe, ctx),
            BuildStage::Merge => self.stage_merge(recipe, ctx),
            BuildStage::Strip => self.stage_strip(ctx),
            BuildStage::Package => self.stage_package(recipe, ctx),
            BuildStage::ExpandRoot => self.stage_expand_root(recipe, ctx),
        }
    }

    fn hook_runner<'r>(&self, recipe: &'r Recipe, ctx: &BuildContext) -> HookRunner<'r> {
        // hooks run on the host, so they see the host-side DESTDIR
        HookRunner::new(recipe, &self.config.hooks_dir, self.options.force)
            .env_var("JOBS", &self.config.jobs.to_string())
            .env_var(
                "DESTDIR",
                &ctx.sandbox_root.join("destdir").display().to_string(),
            )
    }

    /// Acquire (or re-find in cache) the recipe's source
    fn acquire(&self, recipe: &Recipe, ctx: &mut BuildContext) -> Result<AcquiredSource> {
        if let Some(acquired) = &ctx.acquired {
            return Ok(acquired.clone());
        }
        let acquired = SourceAcquirer::new(self.config)
            .quiet(self.options.quiet)
            .acquire(recipe)?;
        ctx.acquired = Some(acquired.clone());
        Ok(acquired)
    }

    fn stage_download(&self, recipe: &Recipe, ctx: &mut BuildContext) -> Result<()> {
        self.hook_runner(recipe, ctx).run("pre-download")?;
        if recipe.sources.is_empty() {
            info!("{} declares no sources", ctx.key);
        } else {
            self.acquire(recipe, ctx)?;
        }
        self.hook_runner(recipe, ctx).run("post-download")
    }

    fn stage_verify(&self, recipe: &Recipe, ctx: &mut BuildContext) -> Result<()> {
        if recipe.sources.is_empty() {
            return Ok(());
        }
        let acquired = self.acquire(recipe, ctx)?;
        if let AcquiredSource::File(path) = &acquired {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            let entry = recipe.sources.iter().find(|s| s.cache_name() == name);
            match entry.and_then(|s| s.checksum.as_ref()) {
                Some(expected) => verify_checksum(path, expected)?,
                None => warn!("{}: no checksum declared for {}", ctx.key, name),
            }
        }
        Ok(())
    }

    fn stage_extract(&self, recipe: &Recipe, ctx: &mut BuildContext) -> Result<()> {
        // a re-run starts from a clean extraction
        if ctx.extract_base.exists() {
            std::fs::remove_dir_all(&ctx.extract_base)?;
        }
        std::fs::create_dir_all(&ctx.extract_base)?;

        if recipe.sources.is_empty() {
            ctx.src_root = Some(ctx.extract_base.clone());
            return Ok(());
        }
        match self.acquire(recipe, ctx)? {
            AcquiredSource::File(archive) => {
                extract_archive(&archive, &ctx.extract_base)?;
                ctx.src_root = Some(source_root(&ctx.extract_base)?);
            }
            AcquiredSource::Tree(checkout) => {
                let dest = ctx.extract_base.join(&recipe.name);
                copy_tree(&checkout, &dest)?;
                ctx.src_root = Some(dest);
            }
        }
        Ok(())
    }

    /// Source root, recomputed when resuming past the extract stage
    fn src_root(&self, ctx: &mut BuildContext) -> Result<PathBuf> {
        if let Some(root) = &ctx.src_root {
            return Ok(root.clone());
        }
        if !ctx.extract_base.is_dir() {
            return Err(Error::NotFound(format!(
                "no extracted source for {} (run without --resume?)",
                ctx.key
            )));
        }
        let root = source_root(&ctx.extract_base)?;
        ctx.src_root = Some(root.clone());
        Ok(root)
    }

    fn stage_patch(&self, recipe: &Recipe, ctx: &mut BuildContext) -> Result<()> {
        self.hook_runner(recipe, ctx).run("pre-patch")?;
        let src_root = self.src_root(ctx)?;
        for patch_name in &recipe.patches {
            let patch = recipe
                .dir
                .as_ref()
                .map(|d| d.join(patch_name))
                .filter(|p| p.is_file())
                .ok_or_else(|| Error::NotFound(format!("patch {patch_name}")))?;
            apply_patch(&src_root, &patch)?;
        }
        self.hook_runner(recipe, ctx).run("post-patch")
    }

    fn stage_build(&self, recipe: &Recipe, ctx: &mut BuildContext) -> Result<()> {
        self.hook_runner(recipe, ctx).run("pre-build")?;
        let Some(block) = &recipe.build else {
            info!("{} has no build block", ctx.key);
            return Ok(());
        };
        let code = self.run_confined(recipe, ctx, block, false)?;
        if code != 0 {
            return Err(Error::BuildFailed {
                package: ctx.key.clone(),
                reason: format!("build commands exited {code}"),
            });
        }
        Ok(())
    }

    fn stage_install(&self, recipe: &Recipe, ctx: &mut BuildContext) -> Result<()> {
        if let Some(block) = &recipe.install {
            let code = self.run_confined(recipe, ctx, block, true)?;
            if code != 0 {
                return Err(Error::InstallFailed {
                    package: ctx.key.clone(),
                    reason: format!("install commands exited {code}"),
                });
            }
        } else {
            info!("{} has no install block", ctx.key);
        }
        self.hook_runner(recipe, ctx).run("post-build")
    }

    fn stage_merge(&self, recipe: &Recipe, ctx: &mut BuildContext) -> Result<()> {
        let destdir = ctx.sandbox_root.join("destdir");
        if ctx.staging.exists() {
            std::fs::remove_dir_all(&ctx.staging)?;
        }
        std::fs::create_dir_all(&ctx.staging)?;
        if destdir.is_dir() {
            copy_tree(&destdir, &ctx.staging)?;
        }
        if std::fs::read_dir(&ctx.staging)?.next().is_none() {
            warn!("{}: staging is empty after install", ctx.key);
        }
        self.hook_runner(recipe, ctx).run("post-install")
    }

    fn stage_strip(&self, ctx: &mut BuildContext) -> Result<()> {
        if !self.config.strip_binaries {
            return Ok(());
        }
        let stripped = strip_tree(&ctx.staging)?;
        if stripped > 0 {
            info!("{}: stripped {} ELF file(s)", ctx.key, stripped);
        }
        Ok(())
    }

    fn stage_package(&self, recipe: &Recipe, ctx: &mut BuildContext) -> Result<()> {
        let artifact = package_staging(
            &ctx.staging,
            &ctx.artifact_dir,
            &ctx.key,
            self.config.package_format,
        )?;
        ctx.artifact = Some(artifact);
        self.hook_runner(recipe, ctx).run("post-package")
    }

    fn stage_expand_root(&self, recipe: &Recipe, ctx: &mut BuildContext) -> Result<()> {
        let artifact = ctx
            .artifact
            .clone()
            .or_else(|| self.existing_artifact(ctx))
            .ok_or_else(|| Error::NotFound(format!("artifact for {}", ctx.key)))?;
        let target = if recipe.stage.uses_bootstrap_root() {
            self.config.lfs_root.clone()
        } else {
            PathBuf::from("/")
        };

        let entries = artifact_entry_count(&artifact)?;
        if entries == 0 {
            // an empty overlay onto a critical root can only clobber
            return Err(Error::InvalidInput(format!(
                "refusing to expand empty artifact {} onto {}",
                ctx.key,
                target.display()
            )));
        }
        if !self.options.auto_yes && !confirm(&format!("expand {} onto {}?", ctx.key, target.display()))? {
            return Err(Error::InvalidInput("expand-to-root declined".to_string()));
        }
        warn!(
            "expanding {} ({} entries) onto {}",
            ctx.key,
            entries,
            target.display()
        );

        self.hook_runner(recipe, ctx).run("pre-expand-root")?;
        extract_artifact(&artifact, &target)?;
        self.hook_runner(recipe, ctx).run("post-expand-root")
    }

    /// Locate a previously packaged artifact (resume past the package stage)
    fn existing_artifact(&self, ctx: &BuildContext) -> Option<PathBuf> {
        let candidate = ctx.artifact_dir.join(format!(
            "{}.{}",
            ctx.key,
            self.config.package_format.extension()
        ));
        candidate.exists().then_some(candidate)
    }

    /// Run a command block inside the isolation primitive
    fn run_confined(
        &self,
        recipe: &Recipe,
        ctx: &mut BuildContext,
        block: &str,
        fake_root: bool,
    ) -> Result<i32> {
        let src_root = self.src_root(ctx)?;
        let destdir = ctx.sandbox_root.join("destdir");
        std::fs::create_dir_all(&destdir)?;

        let in_src = format!("/{}", recipe.name);
        let mut spec = SandboxSpec::new(&ctx.sandbox_root, &in_src)
            .bind_rw(&src_root, &in_src)
            .env_var("DESTDIR", "/destdir")
            .env_var("JOBS", &self.config.jobs.to_string())
            .env_var("MAKEFLAGS", &format!("-j{}", self.config.jobs))
            .env_var("PKG_NAME", &recipe.name)
            .env_var("PKG_VERSION", &recipe.version)
            .env_var("PKG_PREFIX", &recipe.prefix);
        if recipe.stage.uses_bootstrap_root() {
            spec = spec
                .env_var("LFS", &self.config.lfs_root.display().to_string())
                .env_var("LFS_TGT", &self.config.lfs_target);
        }

        let script = format!("set -e\n{block}");
        let command = if fake_root && have_command("fakeroot") {
            format!("fakeroot sh -c {}", shell_quote(&script))
        } else {
            if fake_root {
                warn!("fakeroot not found; DESTDIR ownership recorded at packaging time");
            }
            script
        };

        match &self.isolation {
            Some(isolation) => isolation.run(&spec, &command),
            None => sandbox::select(self.config.chroot_method)?.run(&spec, &command),
        }
    }
}

/// Recursive copy preserving permissions and symlinks
pub fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in walkdir::WalkDir::new(src)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::IoError(e.to_string()))?;
        let target = dest.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            if target.exists() {
                std::fs::remove_file(&target)?;
            }
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn have_command(name: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {name} >/dev/null 2>&1"))
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_tree_preserves_layout() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("usr/bin")).unwrap();
        std::fs::write(src.join("usr/bin/tool"), b"bin").unwrap();
        std::os::unix::fs::symlink("tool", src.join("usr/bin/alias")).unwrap();

        let dest = dir.path().join("dest");
        copy_tree(&src, &dest).unwrap();
        assert_eq!(std::fs::read(dest.join("usr/bin/tool")).unwrap(), b"bin");
        assert_eq!(
            std::fs::read_link(dest.join("usr/bin/alias")).unwrap(),
            PathBuf::from("tool")
        );
    }

    #[test]
    fn test_shell_quote_handles_single_quotes() {
        assert_eq!(shell_quote("echo 'hi'"), "'echo '\\''hi'\\'''");
        assert_eq!(shell_quote("plain"), "'plain'");
    }

    #[test]
    fn test_have_command() {
        assert!(have_command("sh"));
        assert!(!have_command("definitely-not-a-real-binary-xyz"));
    }
}
