//! The validation gate.
//!
//! Runs lint, tests, and coverage — in that order, inside the sandbox — and
//! folds what happened into an immutable [`ValidationResult`]. A resource
//! ceiling breach during any phase is a sandbox violation and forces a fail
//! verdict no matter what earlier phases observed.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use toolforge_registry::{Diagnostic, Phase, ResourceUsage, ValidationResult};
use toolforge_sandbox::{ExecutionOutcome, SandboxRunner, SecurityPolicy};

use crate::error::Result;

/// The commands validation phases run, as argv templates.
///
/// The artifact or test path is appended to each template at run time, so a
/// toolchain is plain data and environments can swap in what they have
/// installed.
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// Static check over the artifact.
    pub lint: Vec<String>,

    /// Test suite execution.
    pub tests: Vec<String>,

    /// Test execution under coverage measurement, if available.
    pub coverage_run: Option<Vec<String>>,

    /// Coverage report, parsed for the total percentage.
    pub coverage_report: Option<Vec<String>>,
}

impl Toolchain {
    /// The full pytest + coverage toolchain.
    pub fn pytest() -> Self {
        Self {
            lint: argv(&["python3", "-m", "py_compile"]),
            tests: argv(&["python3", "-m", "pytest", "-q"]),
            coverage_run: Some(argv(&["python3", "-m", "coverage", "run", "-m", "pytest", "-q"])),
            coverage_report: Some(argv(&["python3", "-m", "coverage", "report"])),
        }
    }

    /// A stdlib-only toolchain: compile check plus direct test execution.
    /// Coverage is unavailable, so that phase never runs.
    pub fn plain_python() -> Self {
        Self {
            lint: argv(&["python3", "-m", "py_compile"]),
            tests: argv(&["python3"]),
            coverage_run: None,
            coverage_report: None,
        }
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Which phases to run and the coverage bar.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub run_lint: bool,
    pub run_tests: bool,
    pub run_coverage: bool,

    /// Minimum acceptable total coverage, in percent.
    pub coverage_threshold: f32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            run_lint: true,
            run_tests: true,
            run_coverage: true,
            coverage_threshold: 80.0,
        }
    }
}

impl ValidationConfig {
    /// Disable every phase. Useful where validation evidence comes from
    /// elsewhere; the recorded result shows that nothing ran.
    pub fn disabled() -> Self {
        Self {
            run_lint: false,
            run_tests: false,
            run_coverage: false,
            coverage_threshold: 0.0,
        }
    }
}

/// Orchestrates validation phases inside the sandbox.
pub struct Validator {
    runner: Arc<SandboxRunner>,
    toolchain: Toolchain,
    config: ValidationConfig,
}

impl Validator {
    /// Create a validator.
    pub fn new(runner: Arc<SandboxRunner>, toolchain: Toolchain, config: ValidationConfig) -> Self {
        Self {
            runner,
            toolchain,
            config,
        }
    }

    /// Validate an artifact with its test suite under the given policy.
    ///
    /// For a deterministic tool the verdict and diagnostic set depend only on
    /// the artifact, tests, and policy: the phase commands are fixed and the
    /// sandbox gives each run the same environment.
    pub async fn validate(
        &self,
        artifact: &Path,
        tests: &Path,
        policy: &SecurityPolicy,
        cancel: &CancellationToken,
    ) -> Result<ValidationResult> {
        let mut phases_run = Vec::new();
        let mut wall_time = Duration::ZERO;

        let workdir = artifact.parent().unwrap_or_else(|| Path::new("."));

        // Tests import the artifact by module name, and compilers/test
        // runners drop caches next to the files under test, so the working
        // directory is writable for the duration of validation. Coverage data
        // is pinned to the working directory because each sandboxed command
        // gets its own scratch cwd.
        let env = [
            (
                "PYTHONPATH".to_string(),
                workdir.to_string_lossy().into_owned(),
            ),
            (
                "COVERAGE_FILE".to_string(),
                workdir.join(".coverage").to_string_lossy().into_owned(),
            ),
        ];
        let mut policy = policy.clone();
        policy.filesystem.writable_paths.push(workdir.to_path_buf());
        let policy = &policy;

        if self.config.run_lint {
            phases_run.push(Phase::Lint);
            let exec = self
                .run_phase(&self.toolchain.lint, artifact, &env, policy, cancel)
                .await?;
            wall_time += exec.1;
            match exec.0 {
                ExecutionOutcome::Completed { .. } => {}
                ExecutionOutcome::ResourceExceeded { kind, stderr, .. } => {
                    return Ok(fail_with_violation(
                        Phase::Lint,
                        Some(kind),
                        stderr,
                        phases_run,
                        wall_time,
                    ));
                }
                ExecutionOutcome::ExecutionFailed { stderr, stdout, .. } => {
                    let message = if stderr.trim().is_empty() { stdout } else { stderr };
                    return Ok(ValidationResult::fail(
                        vec![Diagnostic::Lint {
                            message: message.trim().to_string(),
                        }],
                        phases_run,
                        usage(wall_time),
                    ));
                }
            }
        }

        if self.config.run_tests {
            phases_run.push(Phase::Tests);
            let exec = self
                .run_phase(&self.toolchain.tests, tests, &env, policy, cancel)
                .await?;
            wall_time += exec.1;
            match exec.0 {
                ExecutionOutcome::Completed { .. } => {}
                ExecutionOutcome::ResourceExceeded { kind, stderr, .. } => {
                    return Ok(fail_with_violation(
                        Phase::Tests,
                        Some(kind),
                        stderr,
                        phases_run,
                        wall_time,
                    ));
                }
                ExecutionOutcome::ExecutionFailed { stdout, stderr, .. } => {
                    return Ok(ValidationResult::fail(
                        failing_test_diagnostics(&stdout, &stderr),
                        phases_run,
                        usage(wall_time),
                    ));
                }
            }
        }

        if self.config.run_coverage {
            if let (Some(run_argv), Some(report_argv)) = (
                self.toolchain.coverage_run.as_ref(),
                self.toolchain.coverage_report.as_ref(),
            ) {
                phases_run.push(Phase::Coverage);

                let exec = self
                    .run_phase(run_argv, tests, &env, policy, cancel)
                    .await?;
                wall_time += exec.1;
                match exec.0 {
                    ExecutionOutcome::Completed { .. } => {}
                    ExecutionOutcome::ResourceExceeded { kind, stderr, .. } => {
                        return Ok(fail_with_violation(
                            Phase::Coverage,
                            Some(kind),
                            stderr,
                            phases_run,
                            wall_time,
                        ));
                    }
                    ExecutionOutcome::ExecutionFailed { stdout, stderr, .. } => {
                        return Ok(ValidationResult::fail(
                            failing_test_diagnostics(&stdout, &stderr),
                            phases_run,
                            usage(wall_time),
                        ));
                    }
                }

                let report = self
                    .runner
                    .run_command(report_argv, None, &env, policy, cancel)
                    .await
                    .map_err(map_sandbox_error)?;
                wall_time += report.duration;
                // An unparseable report counts as zero coverage rather than a
                // silent pass.
                let percent =
                    parse_coverage_percent(report.outcome.stdout()).unwrap_or(0.0);
                debug!(percent, "coverage measured");
                if percent < self.config.coverage_threshold {
                    return Ok(ValidationResult::fail(
                        vec![Diagnostic::Coverage {
                            percent,
                            threshold: self.config.coverage_threshold,
                        }],
                        phases_run,
                        usage(wall_time),
                    ));
                }
            }
        }

        info!(phases = phases_run.len(), "validation passed");
        Ok(ValidationResult::pass(phases_run, usage(wall_time)))
    }

    async fn run_phase(
        &self,
        template: &[String],
        target: &Path,
        env: &[(String, String)],
        policy: &SecurityPolicy,
        cancel: &CancellationToken,
    ) -> Result<(ExecutionOutcome, Duration)> {
        let mut argv = template.to_vec();
        argv.push(target.to_string_lossy().into_owned());
        let execution = self
            .runner
            .run_command(&argv, None, env, policy, cancel)
            .await
            .map_err(map_sandbox_error)?;
        Ok((execution.outcome, execution.duration))
    }
}

fn usage(wall_time: Duration) -> ResourceUsage {
    ResourceUsage { wall_time }
}

fn map_sandbox_error(e: toolforge_sandbox::SandboxError) -> crate::error::LifecycleError {
    match e {
        toolforge_sandbox::SandboxError::Cancelled => crate::error::LifecycleError::Cancelled,
        other => crate::error::LifecycleError::Sandbox(other),
    }
}

fn fail_with_violation(
    phase: Phase,
    resource: Option<toolforge_sandbox::ResourceKind>,
    detail: String,
    phases_run: Vec<Phase>,
    wall_time: Duration,
) -> ValidationResult {
    ValidationResult::fail(
        vec![Diagnostic::SandboxViolation {
            phase,
            resource,
            detail: detail.trim().to_string(),
        }],
        phases_run,
        usage(wall_time),
    )
}

/// Turn failing test output into diagnostics.
///
/// Pytest names failures as `FAILED path::test_name`; without those markers
/// (plain assert-based suites) a single unnamed failure is recorded.
fn failing_test_diagnostics(stdout: &str, stderr: &str) -> Vec<Diagnostic> {
    let mut names = Vec::new();
    for line in stdout.lines().chain(stderr.lines()) {
        let Some(rest) = line.trim().strip_prefix("FAILED ") else {
            continue;
        };
        let name = rest
            .rsplit("::")
            .next()
            .unwrap_or(rest)
            .split_whitespace()
            .next()
            .unwrap_or(rest);
        names.push(name.to_string());
    }
    names.dedup();

    if names.is_empty() {
        names.push("unidentified".to_string());
    }
    names
        .into_iter()
        .map(|test| Diagnostic::TestFailure { test })
        .collect()
}

/// Pull the total percentage out of a coverage report.
fn parse_coverage_percent(output: &str) -> Option<f32> {
    // Prefer the TOTAL row; fall back to the last percentage anywhere.
    let mut fallback = None;
    for line in output.lines() {
        let Some(token) = line
            .split_whitespace()
            .last()
            .and_then(|t| t.strip_suffix('%'))
        else {
            continue;
        };
        let Ok(percent) = token.parse::<f32>() else {
            continue;
        };
        if line.trim_start().starts_with("TOTAL") {
            return Some(percent);
        }
        fallback = Some(percent);
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use toolforge_sandbox::{IsolationLevel, RunnerConfig};

    fn test_runner() -> Arc<SandboxRunner> {
        Arc::new(SandboxRunner::new(
            RunnerConfig::default()
                .with_isolation(IsolationLevel::BestEffort)
                .with_wall_clock_margin(Duration::from_secs(2)),
        ))
    }

    fn python3_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    async fn write_artifacts(
        dir: &Path,
        code: &str,
        tests: &str,
    ) -> (std::path::PathBuf, std::path::PathBuf) {
        let artifact = dir.join("square.py");
        let test_file = dir.join("test_square.py");
        tokio::fs::write(&artifact, code).await.unwrap();
        tokio::fs::write(&test_file, tests).await.unwrap();
        (artifact, test_file)
    }

    #[test]
    fn coverage_percent_prefers_total_row() {
        let report = "Name    Stmts   Miss  Cover\n\
                      square.py   4      0   100%\n\
                      TOTAL       4      1    75%\n";
        assert_eq!(parse_coverage_percent(report), Some(75.0));
        assert_eq!(parse_coverage_percent("no percentages here"), None);
    }

    #[test]
    fn failing_tests_are_named_from_pytest_output() {
        let stdout = "FAILED test_square.py::test_negative - assert 9 == -9\n\
                      FAILED test_square.py::test_zero\n\
                      1 passed, 2 failed\n";
        let diagnostics = failing_test_diagnostics(stdout, "");
        assert_eq!(
            diagnostics,
            vec![
                Diagnostic::TestFailure {
                    test: "test_negative".to_string()
                },
                Diagnostic::TestFailure {
                    test: "test_zero".to_string()
                },
            ]
        );
    }

    #[test]
    fn unnamed_failures_still_produce_a_diagnostic() {
        let diagnostics = failing_test_diagnostics("", "AssertionError");
        assert_eq!(diagnostics.len(), 1);
    }

    #[tokio::test]
    async fn disabled_config_passes_with_no_phases() {
        let validator = Validator::new(
            test_runner(),
            Toolchain::plain_python(),
            ValidationConfig::disabled(),
        );
        let result = validator
            .validate(
                Path::new("/nonexistent/a.py"),
                Path::new("/nonexistent/test_a.py"),
                &SecurityPolicy::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.passed());
        assert!(result.phases_run.is_empty());
    }

    #[tokio::test]
    async fn passing_artifact_passes_validation() {
        if !python3_available() {
            return;
        }
        let dir = tempfile::TempDir::new().unwrap();
        let (artifact, tests) = write_artifacts(
            dir.path(),
            "def square(x):\n    return x * x\n",
            "from square import square\n\n\
             def test_square():\n    assert square(5) == 25\n\n\
             test_square()\n",
        )
        .await;

        let mut config = ValidationConfig::default();
        config.run_coverage = false;
        let validator = Validator::new(test_runner(), Toolchain::plain_python(), config);
        let result = validator
            .validate(
                &artifact,
                &tests,
                &SecurityPolicy::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.passed(), "diagnostics: {:?}", result.diagnostics);
        assert_eq!(result.phases_run, vec![Phase::Lint, Phase::Tests]);
    }

    #[tokio::test]
    async fn failing_test_fails_validation() {
        if !python3_available() {
            return;
        }
        let dir = tempfile::TempDir::new().unwrap();
        let (artifact, tests) = write_artifacts(
            dir.path(),
            "def square(x):\n    return x * x\n",
            "from square import square\n\nassert square(5) == 26\n",
        )
        .await;

        let mut config = ValidationConfig::default();
        config.run_coverage = false;
        let validator = Validator::new(test_runner(), Toolchain::plain_python(), config);
        let result = validator
            .validate(
                &artifact,
                &tests,
                &SecurityPolicy::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!result.passed());
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| matches!(d, Diagnostic::TestFailure { .. }))
        );
    }

    #[tokio::test]
    async fn syntax_error_fails_lint() {
        if !python3_available() {
            return;
        }
        let dir = tempfile::TempDir::new().unwrap();
        let (artifact, tests) =
            write_artifacts(dir.path(), "def square(x:\n    return x\n", "pass\n").await;

        let mut config = ValidationConfig::default();
        config.run_coverage = false;
        let validator = Validator::new(test_runner(), Toolchain::plain_python(), config);
        let result = validator
            .validate(
                &artifact,
                &tests,
                &SecurityPolicy::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!result.passed());
        assert_eq!(result.phases_run, vec![Phase::Lint]);
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| matches!(d, Diagnostic::Lint { .. }))
        );
    }

    #[tokio::test]
    async fn runaway_tests_are_a_sandbox_violation() {
        if !python3_available() {
            return;
        }
        let dir = tempfile::TempDir::new().unwrap();
        let (artifact, tests) = write_artifacts(
            dir.path(),
            "def square(x):\n    return x * x\n",
            "while True:\n    pass\n",
        )
        .await;

        let mut config = ValidationConfig::default();
        config.run_coverage = false;
        let validator = Validator::new(test_runner(), Toolchain::plain_python(), config);
        let policy = SecurityPolicy::default().with_cpu_limit(Duration::from_secs(1));
        let result = validator
            .validate(&artifact, &tests, &policy, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.passed());
        assert!(result.diagnostics.iter().any(|d| matches!(
            d,
            Diagnostic::SandboxViolation {
                phase: Phase::Tests,
                ..
            }
        )));
    }
}
