// src/sandbox/mod.rs

//! Filesystem isolation for build and install steps
//!
//! Isolation is a capability: the builder asks for an [`Isolation`]
//! implementation and gets either the namespace sandbox (unshare + bind
//! mounts + chroot into a private overlay root) or, when namespaces are
//! unavailable and `CHROOT_METHOD=chroot` permits it, a plain chroot that
//! needs root and is selected with a logged warning.
//!
//! The sandbox root is prepared by the caller; this module only mounts,
//! confines and executes. Network is denied by default via a fresh network
//! namespace.

use crate::config::ChrootMethod;
use crate::error::{Error, Result};
use nix::mount::{mount, MsFlags};
use nix::sched::{unshare, CloneFlags};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Host directories bind-mounted read-only for toolchain visibility
const TOOLCHAIN_MOUNTS: &[&str] = &["/usr", "/bin", "/lib", "/lib64"];

/// What to execute and under which confinement
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    /// Private overlay root; the caller has already populated it
    pub root: PathBuf,
    /// Working directory inside the sandbox (an absolute in-sandbox path)
    pub workdir: PathBuf,
    /// Additional writable binds (host path, in-sandbox path)
    pub binds_rw: Vec<(PathBuf, PathBuf)>,
    /// Whitelisted environment
    pub env: Vec<(String, String)>,
    /// Leave the host network reachable
    pub allow_network: bool,
    /// Wall-clock bound for the child; None means unbounded
    pub timeout: Option<Duration>,
}

impl SandboxSpec {
    pub fn new(root: impl Into<PathBuf>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            workdir: workdir.into(),
            binds_rw: Vec::new(),
            env: Vec::new(),
            allow_network: false,
            timeout: None,
        }
    }

    pub fn env_var(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn bind_rw(mut self, host: impl Into<PathBuf>, inside: impl Into<PathBuf>) -> Self {
        self.binds_rw.push((host.into(), inside.into()));
        self
    }
}

/// An isolation primitive able to run a shell command confined to a root
pub trait Isolation {
    fn name(&self) -> &'static str;

    /// Run `sh -c command` confined per `spec`; returns the exit code
    fn run(&self, spec: &SandboxSpec, command: &str) -> Result<i32>;
}

/// Pick the isolation primitive for this run. Namespace isolation is the
/// default; `CHROOT_METHOD=chroot` or unavailable namespaces fall back to
/// the privileged chroot with a warning.
pub fn select(method: ChrootMethod) -> Result<Box<dyn Isolation>> {
    match method {
        ChrootMethod::Sandbox if namespaces_available() => Ok(Box::new(NamespaceSandbox)),
        ChrootMethod::Sandbox => {
            warn!("namespace isolation unavailable, falling back to chroot (requires privilege)");
            ChrootFallback::require_privilege()?;
            Ok(Box::new(ChrootFallback))
        }
        ChrootMethod::Chroot => {
            warn!("CHROOT_METHOD=chroot: using privileged chroot isolation");
            ChrootFallback::require_privilege()?;
            Ok(Box::new(ChrootFallback))
        }
    }
}

/// Namespace isolation is usable as root or with unprivileged user
/// namespaces enabled.
pub fn namespaces_available() -> bool {
    if nix::unistd::geteuid().is_root() {
        return true;
    }
    let knob = Path::new("/proc/sys/kernel/unprivileged_userns_clone");
    if knob.exists() {
        return fs::read_to_string(knob)
            .map(|v| v.trim() == "1")
            .unwrap_or(false);
    }
    // mainline kernels enable unprivileged userns by default
    true
}

/// unshare-based sandbox with a private overlay root
pub struct NamespaceSandbox;

impl Isolation for NamespaceSandbox {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    fn run(&self, spec: &SandboxSpec, command: &str) -> Result<i32> {
        let started = Instant::now();
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => wait_for_child(child, spec.timeout, started),
            Ok(ForkResult::Child) => {
                let code = child_confine_and_run(spec, command).unwrap_or_else(|e| {
                    eprintln!("sandbox setup failed: {e}");
                    127
                });
                std::process::exit(code);
            }
            Err(e) => Err(Error::SandboxUnavailable(format!("fork failed: {e}"))),
        }
    }
}

/// Plain chroot; only valid with euid 0
pub struct ChrootFallback;

impl ChrootFallback {
    fn require_privilege() -> Result<()> {
        if !nix::unistd::geteuid().is_root() {
            return Err(Error::SandboxUnavailable(
                "chroot fallback requires root privileges".to_string(),
            ));
        }
        Ok(())
    }
}

impl Isolation for ChrootFallback {
    fn name(&self) -> &'static str {
        "chroot"
    }

    fn run(&self, spec: &SandboxSpec, command: &str) -> Result<i32> {
        let started = Instant::now();
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => wait_for_child(child, spec.timeout, started),
            Ok(ForkResult::Child) => {
                let code = (|| -> Result<i32> {
                    enter_root(&spec.root, &spec.workdir)?;
                    exec_shell(spec, command)
                })()
                .unwrap_or_else(|e| {
                    eprintln!("chroot setup failed: {e}");
                    127
                });
                std::process::exit(code);
            }
            Err(e) => Err(Error::SandboxUnavailable(format!("fork failed: {e}"))),
        }
    }
}

/// Child side of the namespace sandbox: unshare, mount, confine, exec
fn child_confine_and_run(spec: &SandboxSpec, command: &str) -> Result<i32> {
    let mut flags = CloneFlags::CLONE_NEWNS
        | CloneFlags::CLONE_NEWPID
        | CloneFlags::CLONE_NEWUTS
        | CloneFlags::CLONE_NEWIPC;
    if !spec.allow_network {
        flags |= CloneFlags::CLONE_NEWNET;
    }
    if !nix::unistd::geteuid().is_root() {
        flags |= CloneFlags::CLONE_NEWUSER;
    }
    unshare(flags).map_err(|e| Error::SandboxUnavailable(format!("unshare failed: {e}")))?;

    set_sandbox_hostname("porg-build");
    apply_child_limits();
    setup_mounts(spec)?;
    enter_root(&spec.root, &spec.workdir)?;
    exec_shell(spec, command)
}

/// Rename the UTS namespace so build logs identify sandboxed output
fn set_sandbox_hostname(hostname: &str) {
    let Ok(name) = std::ffi::CString::new(hostname) else {
        return;
    };
    unsafe {
        if libc::sethostname(name.as_ptr(), hostname.len()) != 0 {
            warn!("sethostname failed in sandbox");
        }
    }
}

/// Max processes inside the sandbox
const SANDBOX_NPROC_LIMIT: u64 = 4096;

/// Cap runaway fork storms; builds otherwise run unlimited
fn apply_child_limits() {
    let limit = libc::rlimit {
        rlim_cur: SANDBOX_NPROC_LIMIT,
        rlim_max: SANDBOX_NPROC_LIMIT,
    };
    unsafe {
        if libc::setrlimit(libc::RLIMIT_NPROC, &limit) != 0 {
            warn!("setrlimit RLIMIT_NPROC failed");
        }
    }
}

fn setup_mounts(spec: &SandboxSpec) -> Result<()> {
    // keep mount changes out of the host namespace
    mount::<str, str, str, str>(None, "/", None, MsFlags::MS_PRIVATE | MsFlags::MS_REC, None)
        .map_err(|e| Error::SandboxUnavailable(format!("make-rprivate failed: {e}")))?;

    // read-only toolchain visibility
    for host in TOOLCHAIN_MOUNTS {
        let source = Path::new(host);
        if !source.exists() {
            continue;
        }
        let target = join_inside(&spec.root, host);
        fs::create_dir_all(&target)?;
        bind_mount(source, &target, true)?;
    }

    // writable binds requested by the builder
    for (host, inside) in &spec.binds_rw {
        let target = join_inside(&spec.root, inside);
        if host.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            if !target.exists() {
                File::create(&target)?;
            }
        }
        bind_mount(host, &target, false)?;
    }

    // private /dev, /proc, /tmp
    let dev = spec.root.join("dev");
    fs::create_dir_all(&dev)?;
    for node in ["null", "zero", "urandom", "random"] {
        let host = PathBuf::from("/dev").join(node);
        let target = dev.join(node);
        if host.exists() {
            if !target.exists() {
                File::create(&target)?;
            }
            bind_mount(&host, &target, false)?;
        }
    }
    let proc_dir = spec.root.join("proc");
    fs::create_dir_all(&proc_dir)?;
    // best effort: a PID namespace without a remounted /proc still works
    // for most builds
    let _ = mount::<str, Path, str, str>(Some("proc"), &proc_dir, Some("proc"), MsFlags::empty(), None);
    fs::create_dir_all(spec.root.join("tmp"))?;
    let _ = mount::<str, Path, str, str>(
        Some("tmpfs"),
        &spec.root.join("tmp"),
        Some("tmpfs"),
        MsFlags::empty(),
        None,
    );

    Ok(())
}

fn bind_mount(source: &Path, target: &Path, readonly: bool) -> Result<()> {
    mount::<Path, Path, str, str>(Some(source), target, None, MsFlags::MS_BIND | MsFlags::MS_REC, None)
        .map_err(|e| {
            Error::SandboxUnavailable(format!(
                "bind {} -> {} failed: {}",
                source.display(),
                target.display(),
                e
            ))
        })?;
    if readonly {
        // remount read-only; some kernels refuse for recursive binds
        let _ = mount::<Path, Path, str, str>(
            None,
            target,
            None,
            MsFlags::MS_REMOUNT | MsFlags::MS_BIND | MsFlags::MS_RDONLY,
            None,
        );
    }
    Ok(())
}

fn join_inside(root: &Path, inside: impl AsRef<Path>) -> PathBuf {
    let inside = inside.as_ref();
    root.join(inside.strip_prefix("/").unwrap_or(inside))
}

fn enter_root(root: &Path, workdir: &Path) -> Result<()> {
    nix::unistd::chroot(root)
        .map_err(|e| Error::SandboxUnavailable(format!("chroot failed: {e}")))?;
    std::env::set_current_dir("/")
        .map_err(|e| Error::SandboxUnavailable(format!("chdir / failed: {e}")))?;
    if workdir != Path::new("/") {
        std::env::set_current_dir(workdir)
            .map_err(|e| Error::SandboxUnavailable(format!("chdir {} failed: {}", workdir.display(), e)))?;
    }
    Ok(())
}

/// Exec `sh -c command` with a whitelisted environment
fn exec_shell(spec: &SandboxSpec, command: &str) -> Result<i32> {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command).env_clear();
    cmd.env("PATH", "/usr/bin:/usr/sbin:/bin:/sbin");
    cmd.env("HOME", "/tmp");
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    let status = cmd
        .status()
        .map_err(|e| Error::IoError(format!("failed to run shell: {e}")))?;
    Ok(status.code().unwrap_or(-1))
}

/// Parent-side wait with an optional wall-clock bound
fn wait_for_child(child: Pid, timeout: Option<Duration>, started: Instant) -> Result<i32> {
    loop {
        if let Some(limit) = timeout {
            if started.elapsed() > limit {
                let _ = kill(child, Signal::SIGKILL);
                let _ = waitpid(child, None);
                return Err(Error::BuildFailed {
                    package: String::new(),
                    reason: format!("sandboxed command exceeded {limit:?}"),
                });
            }
        }
        match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                debug!("sandbox child killed by {:?}", sig);
                return Ok(128 + sig as i32);
            }
            Ok(_) => std::thread::sleep(Duration::from_millis(10)),
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(Error::IoError(format!("waitpid failed: {e}"))),
        }
    }
}
