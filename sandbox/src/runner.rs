//! The sandboxed process runner.
//!
//! `SandboxRunner` spawns one child process per invocation with kernel-level
//! ceilings applied between `fork` and `exec`: address-space and CPU rlimits,
//! a detached user+network namespace, and a Landlock ruleset that confines
//! writes to the invocation's scratch directory. The runner is stateless
//! across invocations, so any number may run concurrently.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, SandboxError};
use crate::outcome::{Execution, ExecutionOutcome, ResourceKind};
use crate::policy::SecurityPolicy;

/// How strictly the runner treats missing kernel isolation features.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Fail closed: refuse to run if the kernel denies namespace isolation.
    #[default]
    Enforced,

    /// Run anyway with whatever the kernel grants. Resource ceilings still
    /// apply. Intended for validation environments (containers, CI) where
    /// user namespaces are disabled.
    BestEffort,
}

/// Configuration shared by all invocations of one runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Namespace isolation strictness.
    pub isolation: IsolationLevel,

    /// Interpreter used for tool entry-point invocations.
    pub interpreter: PathBuf,

    /// Cap on captured bytes for each of stdout and stderr.
    pub max_output_bytes: usize,

    /// Grace added to the CPU ceiling to form the wall-clock deadline, so a
    /// sleeping (zero-CPU) child still terminates.
    pub wall_clock_margin: Duration,

    /// Keep scratch directories and return their path on the execution
    /// instead of discarding them.
    pub keep_scratch: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::Enforced,
            interpreter: PathBuf::from("python3"),
            max_output_bytes: 64 * 1024,
            wall_clock_margin: Duration::from_secs(5),
            keep_scratch: false,
        }
    }
}

impl RunnerConfig {
    /// Set the isolation level.
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Set the wall-clock grace period.
    pub fn with_wall_clock_margin(mut self, margin: Duration) -> Self {
        self.wall_clock_margin = margin;
        self
    }
}

/// Executes artifacts under process isolation with enforced resource
/// ceilings.
pub struct SandboxRunner {
    config: RunnerConfig,
}

impl SandboxRunner {
    /// Create a runner with the given configuration.
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// The runner's configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run an arbitrary command inside the sandbox.
    ///
    /// `stdin` is written to the child before waiting; `env` entries are the
    /// only variables set besides a scrubbed baseline (`PATH`, `HOME` and
    /// `TMPDIR` pointing into the scratch directory).
    pub async fn run_command(
        &self,
        argv: &[String],
        stdin: Option<&str>,
        env: &[(String, String)],
        policy: &SecurityPolicy,
        cancel: &CancellationToken,
    ) -> Result<Execution> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SandboxError::InvalidArtifact("empty command".to_string()))?;

        let scratch = make_scratch(policy)?;
        let scratch_path = scratch.path().to_path_buf();
        debug!(?program, scratch = %scratch_path.display(), "spawning sandboxed process");

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&scratch_path)
            .env_clear()
            .env("PATH", host_path())
            .env("HOME", &scratch_path)
            .env("TMPDIR", &scratch_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            command.env(key, value);
        }

        apply_isolation(&mut command, policy, self.config.isolation, &scratch_path);

        let mut child = command.spawn().map_err(|e| {
            if self.config.isolation == IsolationLevel::Enforced
                && e.kind() == std::io::ErrorKind::PermissionDenied
            {
                SandboxError::IsolationUnavailable(e.to_string())
            } else {
                SandboxError::Io(e)
            }
        })?;

        if let Some(data) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                // A child that never reads breaks the pipe; that is its
                // problem, not ours.
                let _ = pipe.write_all(data.as_bytes()).await;
            }
        } else {
            drop(child.stdin.take());
        }

        let cap = self.config.max_output_bytes;
        let stdout_task = child
            .stdout
            .take()
            .map(|pipe| tokio::spawn(read_capped(pipe, cap)));
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(read_capped(pipe, cap)));

        let deadline = policy.cpu_time_limit + self.config.wall_clock_margin;
        let start = Instant::now();
        let mut timed_out = false;

        let status = tokio::select! {
            res = child.wait() => res?,
            _ = tokio::time::sleep(deadline) => {
                timed_out = true;
                let _ = child.start_kill();
                child.wait().await?
            }
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(SandboxError::Cancelled);
            }
        };
        let duration = start.elapsed();

        let stdout = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        let outcome = classify(status, timed_out, stdout, stderr);
        if !outcome.is_success() {
            debug!(?outcome, "sandboxed process did not complete cleanly");
        }

        let scratch = if self.config.keep_scratch {
            Some(scratch.keep())
        } else {
            None
        };

        Ok(Execution {
            outcome,
            duration,
            scratch,
        })
    }

    /// Invoke a tool entry point inside an artifact.
    ///
    /// The entry point is called with `args` (a JSON object) as keyword
    /// arguments via a generated interpreter harness; its return value is
    /// printed as JSON on the final stdout line and can be recovered with
    /// [`ExecutionOutcome::tool_output`].
    pub async fn run(
        &self,
        artifact_path: &Path,
        entry_point: &str,
        args: &serde_json::Value,
        policy: &SecurityPolicy,
        cancel: &CancellationToken,
    ) -> Result<Execution> {
        if !args.is_object() {
            return Err(SandboxError::InvalidArtifact(
                "tool arguments must be a JSON object".to_string(),
            ));
        }
        if !is_identifier(entry_point) {
            return Err(SandboxError::InvalidArtifact(format!(
                "entry point '{entry_point}' is not a valid identifier"
            )));
        }

        let module = artifact_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| is_identifier(stem))
            .ok_or_else(|| {
                SandboxError::InvalidArtifact(format!(
                    "artifact path '{}' has no usable module name",
                    artifact_path.display()
                ))
            })?;
        let path_str = artifact_path.to_string_lossy().into_owned();

        let harness = format!(
            "import importlib.util, json, sys\n\
             spec = importlib.util.spec_from_file_location({module:?}, {path_str:?})\n\
             module = importlib.util.module_from_spec(spec)\n\
             spec.loader.exec_module(module)\n\
             result = getattr(module, {entry_point:?})(**json.load(sys.stdin))\n\
             print()\n\
             print(json.dumps(result))\n"
        );

        let argv = vec![
            self.config.interpreter.to_string_lossy().into_owned(),
            "-c".to_string(),
            harness,
        ];
        let stdin = serde_json::to_string(args)
            .map_err(|e| SandboxError::InvalidArtifact(e.to_string()))?;

        self.run_command(&argv, Some(&stdin), &[], policy, cancel)
            .await
    }
}

impl Default for SandboxRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

/// Install the isolation hooks that run in the child between fork and exec.
fn apply_isolation(
    command: &mut Command,
    policy: &SecurityPolicy,
    isolation: IsolationLevel,
    scratch: &Path,
) {
    let mem = policy.memory_limit_bytes as libc::rlim_t;
    let cpu = policy.cpu_limit_secs() as libc::rlim_t;
    let enforce = isolation == IsolationLevel::Enforced;
    let readonly_roots = policy.filesystem.readonly_roots.clone();
    let mut writable = policy.filesystem.writable_paths.clone();
    writable.push(scratch.to_path_buf());

    // SAFETY: the closure only calls async-signal-safe syscalls plus the
    // Landlock setup, and runs in the freshly forked child before exec.
    unsafe {
        command.pre_exec(move || {
            let as_limit = libc::rlimit {
                rlim_cur: mem,
                rlim_max: mem,
            };
            if libc::setrlimit(libc::RLIMIT_AS, &as_limit) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // Soft limit delivers SIGXCPU, hard limit one second later is the
            // backstop SIGKILL.
            let cpu_limit = libc::rlimit {
                rlim_cur: cpu,
                rlim_max: cpu + 1,
            };
            if libc::setrlimit(libc::RLIMIT_CPU, &cpu_limit) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // A fresh user namespace makes the network namespace detach work
            // without privileges; together they leave no route to any host.
            if libc::unshare(libc::CLONE_NEWUSER | libc::CLONE_NEWNET) != 0 && enforce {
                return Err(std::io::Error::last_os_error());
            }

            if let Err(e) = restrict_filesystem(&readonly_roots, &writable) {
                if enforce {
                    return Err(std::io::Error::other(e.to_string()));
                }
            }

            Ok(())
        });
    }
}

/// Confine the child to read-only roots plus the writable set (the scratch
/// directory and any policy-declared extras).
///
/// Uses Landlock at best-effort compatibility: on kernels without Landlock
/// this is a no-op and the namespace + rlimit layers carry the policy.
fn restrict_filesystem(
    readonly_roots: &[PathBuf],
    writable: &[PathBuf],
) -> std::result::Result<(), landlock::RulesetError> {
    use landlock::{
        ABI, Access, AccessFs, Ruleset, RulesetAttr, RulesetCreatedAttr, path_beneath_rules,
    };

    let abi = ABI::V2;
    // Runs in the forked child, so no logging here. A NotEnforced status
    // (kernel predates Landlock) is acceptable: the namespace and rlimit
    // layers still apply.
    Ruleset::default()
        .handle_access(AccessFs::from_all(abi))?
        .create()?
        .add_rules(path_beneath_rules(
            readonly_roots,
            AccessFs::from_read(abi),
        ))?
        .add_rules(path_beneath_rules(writable, AccessFs::from_all(abi)))?
        .restrict_self()?;
    Ok(())
}

/// Create a fresh scratch directory for one invocation.
fn make_scratch(policy: &SecurityPolicy) -> Result<tempfile::TempDir> {
    let parent = policy
        .filesystem
        .scratch_parent
        .clone()
        .unwrap_or_else(std::env::temp_dir);
    tempfile::Builder::new()
        .prefix("toolforge-scratch-")
        .tempdir_in(parent)
        .map_err(|e| SandboxError::Scratch(e.to_string()))
}

/// Classify an exit status into the outcome taxonomy.
fn classify(
    status: std::process::ExitStatus,
    timed_out: bool,
    stdout: String,
    stderr: String,
) -> ExecutionOutcome {
    use std::os::unix::process::ExitStatusExt;

    if timed_out {
        return ExecutionOutcome::ResourceExceeded {
            kind: ResourceKind::Cpu,
            stdout,
            stderr,
        };
    }

    if let Some(signal) = status.signal() {
        if signal == libc::SIGXCPU || signal == libc::SIGKILL {
            return ExecutionOutcome::ResourceExceeded {
                kind: ResourceKind::Cpu,
                stdout,
                stderr,
            };
        }
        return ExecutionOutcome::ExecutionFailed {
            exit_code: 128 + signal,
            stdout,
            stderr,
        };
    }

    match status.code() {
        Some(0) => ExecutionOutcome::Completed { stdout, stderr },
        code => {
            // RLIMIT_AS breaches surface as allocation failures inside the
            // child, not as a distinct signal.
            if looks_like_memory_exhaustion(&stderr) {
                ExecutionOutcome::ResourceExceeded {
                    kind: ResourceKind::Memory,
                    stdout,
                    stderr,
                }
            } else {
                ExecutionOutcome::ExecutionFailed {
                    exit_code: code.unwrap_or(-1),
                    stdout,
                    stderr,
                }
            }
        }
    }
}

fn looks_like_memory_exhaustion(stderr: &str) -> bool {
    const MARKERS: [&str; 4] = [
        "MemoryError",
        "Cannot allocate memory",
        "std::bad_alloc",
        "out of memory",
    ];
    MARKERS.iter().any(|marker| stderr.contains(marker))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn host_path() -> String {
    std::env::var("PATH")
        .unwrap_or_else(|_| "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".into())
}

/// Drain a pipe, keeping at most `cap` bytes.
///
/// Keeps reading past the cap so the child never blocks on a full pipe.
async fn read_capped<R>(mut reader: R, cap: usize) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if kept.len() < cap {
                    let take = n.min(cap - kept.len());
                    kept.extend_from_slice(&chunk[..take]);
                }
            }
        }
    }
    String::from_utf8_lossy(&kept).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_runner() -> SandboxRunner {
        // Container CI frequently disables user namespaces; the ceilings are
        // what these tests exercise.
        SandboxRunner::new(
            RunnerConfig::default()
                .with_isolation(IsolationLevel::BestEffort)
                .with_wall_clock_margin(Duration::from_secs(1)),
        )
    }

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn captures_stdout_of_completed_command() {
        let runner = test_runner();
        let execution = runner
            .run_command(
                &argv(&["sh", "-c", "echo hello"]),
                None,
                &[],
                &SecurityPolicy::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        match execution.outcome {
            ExecutionOutcome::Completed { stdout, .. } => assert_eq!(stdout.trim(), "hello"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_is_execution_failed() {
        let runner = test_runner();
        let execution = runner
            .run_command(
                &argv(&["sh", "-c", "echo boom >&2; exit 3"]),
                None,
                &[],
                &SecurityPolicy::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        match execution.outcome {
            ExecutionOutcome::ExecutionFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 3);
                assert!(stderr.contains("boom"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stdin_is_delivered() {
        let runner = test_runner();
        let execution = runner
            .run_command(
                &argv(&["cat"]),
                Some("piped input"),
                &[],
                &SecurityPolicy::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        match execution.outcome {
            ExecutionOutcome::Completed { stdout, .. } => assert_eq!(stdout, "piped input"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn scratch_directory_is_writable_cwd() {
        let runner = test_runner();
        let execution = runner
            .run_command(
                &argv(&["sh", "-c", "echo data > out.txt && cat out.txt"]),
                None,
                &[],
                &SecurityPolicy::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        match execution.outcome {
            ExecutionOutcome::Completed { stdout, .. } => assert_eq!(stdout.trim(), "data"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cpu_spin_is_killed_with_cpu_kind() {
        let runner = test_runner();
        let policy = SecurityPolicy::default().with_cpu_limit(Duration::from_secs(1));
        let execution = runner
            .run_command(
                &argv(&["sh", "-c", "while :; do :; done"]),
                None,
                &[],
                &policy,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        match execution.outcome {
            ExecutionOutcome::ResourceExceeded { kind, .. } => assert_eq!(kind, ResourceKind::Cpu),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sleeping_child_hits_wall_clock_deadline() {
        let runner = test_runner();
        let policy = SecurityPolicy::default().with_cpu_limit(Duration::from_secs(1));
        let execution = runner
            .run_command(
                &argv(&["sh", "-c", "sleep 30"]),
                None,
                &[],
                &policy,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        match execution.outcome {
            ExecutionOutcome::ResourceExceeded { kind, .. } => assert_eq!(kind, ResourceKind::Cpu),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(execution.duration < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let runner = test_runner();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = runner
            .run_command(
                &argv(&["sh", "-c", "sleep 30"]),
                None,
                &[],
                &SecurityPolicy::default(),
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(SandboxError::Cancelled)));
    }

    #[tokio::test]
    async fn run_rejects_non_object_args() {
        let runner = test_runner();
        let result = runner
            .run(
                Path::new("/tmp/tool.py"),
                "main",
                &serde_json::json!([1, 2]),
                &SecurityPolicy::default(),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(SandboxError::InvalidArtifact(_))));
    }

    #[tokio::test]
    async fn run_rejects_bad_entry_point() {
        let runner = test_runner();
        let result = runner
            .run(
                Path::new("/tmp/tool.py"),
                "os.system",
                &serde_json::json!({}),
                &SecurityPolicy::default(),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(SandboxError::InvalidArtifact(_))));
    }

    #[test]
    fn classify_maps_signals_and_markers() {
        use std::os::unix::process::ExitStatusExt;

        let killed = std::process::ExitStatus::from_raw(libc::SIGKILL);
        match classify(killed, false, String::new(), String::new()) {
            ExecutionOutcome::ResourceExceeded { kind, .. } => assert_eq!(kind, ResourceKind::Cpu),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let oom = std::process::ExitStatus::from_raw(1 << 8);
        match classify(oom, false, String::new(), "MemoryError: ...".to_string()) {
            ExecutionOutcome::ResourceExceeded { kind, .. } => {
                assert_eq!(kind, ResourceKind::Memory);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let plain = std::process::ExitStatus::from_raw(2 << 8);
        match classify(plain, false, String::new(), "ValueError".to_string()) {
            ExecutionOutcome::ExecutionFailed { exit_code, .. } => assert_eq!(exit_code, 2),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn identifier_validation() {
        assert!(is_identifier("square"));
        assert!(is_identifier("_private"));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("os.system"));
        assert!(!is_identifier(""));
    }
}
