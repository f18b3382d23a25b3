//! Local test execution
//!
//! Detects the project's test framework, lists its tests and runs a
//! selection of them, parsing per-test outcomes from the runner output.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{
    TestCaseResult, TestExecutor, TestRun, TestStatus, ToolError, ToolErrorKind, ToolResult,
};

/// Supported test frameworks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestFramework {
    /// Rust/Cargo test runner
    Cargo,
    /// Python pytest
    Pytest,
    /// Go test
    Go,
}

impl TestFramework {
    /// Detect the test framework from project files in the given directory
    pub fn detect(path: &Path) -> Option<Self> {
        if path.join("Cargo.toml").exists() {
            return Some(Self::Cargo);
        }

        if path.join("go.mod").exists() {
            return Some(Self::Go);
        }

        if path.join("pytest.ini").exists()
            || path.join("conftest.py").exists()
            || path.join("pyproject.toml").exists() && Self::has_pytest_config(path)
            || path.join("tests").is_dir() && Self::has_python_tests(&path.join("tests"))
        {
            return Some(Self::Pytest);
        }

        None
    }

    fn has_pytest_config(path: &Path) -> bool {
        std::fs::read_to_string(path.join("pyproject.toml"))
            .map(|content| content.contains("[tool.pytest"))
            .unwrap_or(false)
    }

    fn has_python_tests(tests: &Path) -> bool {
        std::fs::read_dir(tests)
            .map(|entries| {
                entries.flatten().any(|e| {
                    let name = e.file_name();
                    let name = name.to_string_lossy();
                    name.starts_with("test_") && name.ends_with(".py")
                })
            })
            .unwrap_or(false)
    }

    /// Command listing every test id
    fn list_command(&self) -> Command {
        match self {
            Self::Cargo => {
                let mut cmd = Command::new("cargo");
                cmd.args(["test", "--", "--list"]);
                cmd
            }
            Self::Pytest => {
                let mut cmd = Command::new("pytest");
                cmd.args(["--collect-only", "-q"]);
                cmd
            }
            Self::Go => {
                let mut cmd = Command::new("go");
                cmd.args(["test", "-list", ".", "./..."]);
                cmd
            }
        }
    }

    /// Command running exactly the given tests
    fn run_command(&self, tests: &[String]) -> Command {
        match self {
            Self::Cargo => {
                let mut cmd = Command::new("cargo");
                cmd.args(["test", "--no-fail-fast", "--", "--exact"]);
                cmd.args(tests);
                cmd
            }
            Self::Pytest => {
                let mut cmd = Command::new("pytest");
                cmd.args(["--tb=short", "-v"]);
                cmd.args(tests);
                cmd
            }
            Self::Go => {
                let mut cmd = Command::new("go");
                cmd.args(["test", "-v", "-run"]);
                cmd.arg(format!("^({})$", tests.join("|")));
                cmd.arg("./...");
                cmd
            }
        }
    }

    /// Get the name of the framework
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cargo => "cargo test",
            Self::Pytest => "pytest",
            Self::Go => "go test",
        }
    }

    fn parse_listing(&self, stdout: &str) -> Vec<String> {
        match self {
            Self::Cargo => parse_cargo_listing(stdout),
            Self::Pytest => parse_pytest_listing(stdout),
            Self::Go => parse_go_listing(stdout),
        }
    }

    fn parse_results(&self, output: &str) -> Vec<TestCaseResult> {
        match self {
            Self::Cargo => parse_cargo_results(output),
            Self::Pytest => parse_pytest_results(output),
            Self::Go => parse_go_results(output),
        }
    }
}

/// Runs tests in a local working directory
#[derive(Debug, Clone)]
pub struct LocalTestExecutor {
    workdir: PathBuf,
    framework: Option<TestFramework>,
    timeout: Duration,
}

impl LocalTestExecutor {
    /// Create an executor for the given directory
    ///
    /// Automatically detects the test framework from project files.
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        let workdir = workdir.into();
        let framework = TestFramework::detect(&workdir);
        Self {
            workdir,
            framework,
            timeout: Duration::from_secs(300),
        }
    }

    /// Set the timeout for one runner invocation
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Explicitly set the test framework
    pub fn with_framework(mut self, framework: TestFramework) -> Self {
        self.framework = Some(framework);
        self
    }

    pub fn framework(&self) -> Option<TestFramework> {
        self.framework
    }

    /// Directory and framework for a call, detecting the framework of another tree
    fn target(&self, workdir: Option<&Path>) -> ToolResult<(PathBuf, TestFramework)> {
        let (dir, framework) = match workdir {
            Some(dir) => (dir.to_path_buf(), TestFramework::detect(dir).or(self.framework)),
            None => (self.workdir.clone(), self.framework),
        };
        match framework {
            Some(framework) => Ok((dir, framework)),
            None => Err(ToolError::new(
                ToolErrorKind::Unsupported,
                format!("no test framework detected in {}", dir.display()),
            )),
        }
    }

    async fn execute(
        &self,
        dir: &Path,
        mut cmd: Command,
    ) -> ToolResult<(std::process::ExitStatus, String)> {
        cmd.current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolError::execution(format!("failed to run tests: {}", e)))
            }
            Err(_) => {
                return Err(ToolError::new(
                    ToolErrorKind::Timeout,
                    format!("test runner exceeded {:?}", self.timeout),
                ))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok((output.status, format!("{}\n{}", stdout, stderr)))
    }
}

#[async_trait]
impl TestExecutor for LocalTestExecutor {
    async fn discover(&self, workdir: Option<&Path>) -> ToolResult<Vec<String>> {
        let (dir, framework) = self.target(workdir)?;
        let (status, output) = self.execute(&dir, framework.list_command()).await?;
        let tests = framework.parse_listing(&output);
        if tests.is_empty() && !status.success() {
            return Err(ToolError::execution(format!(
                "{} could not list tests ({})",
                framework.name(),
                status
            )));
        }
        debug!(
            framework = framework.name(),
            dir = %dir.display(),
            count = tests.len(),
            "Discovered tests"
        );
        Ok(tests)
    }

    async fn run(&self, tests: &[String], workdir: Option<&Path>) -> ToolResult<TestRun> {
        if tests.is_empty() {
            return Ok(TestRun::default());
        }
        let (dir, framework) = self.target(workdir)?;

        let start = Instant::now();
        let (status, output) = self.execute(&dir, framework.run_command(tests)).await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        let results = reconcile(
            tests,
            framework.parse_results(&output),
            status.success(),
            &status.to_string(),
        );
        let run = TestRun {
            results,
            output,
            duration_ms,
        };
        info!(
            framework = framework.name(),
            passed = run.count(TestStatus::Passed),
            failed = run.count(TestStatus::Failed),
            skipped = run.count(TestStatus::Skipped),
            duration_ms,
            "Test run finished"
        );
        Ok(run)
    }
}

/// One result per requested test, in request order
///
/// A requested test with no reported outcome failed; when the runner itself
/// exited abnormally the note says so.
fn reconcile(
    requested: &[String],
    parsed: Vec<TestCaseResult>,
    exited_cleanly: bool,
    exit: &str,
) -> Vec<TestCaseResult> {
    let mut by_id: HashMap<String, TestCaseResult> = HashMap::new();
    for result in parsed {
        by_id.insert(result.id.clone(), result);
    }

    requested
        .iter()
        .map(|id| {
            let found = by_id
                .remove(id)
                .or_else(|| take_by_suffix(&mut by_id, id));
            if let Some(mut result) = found {
                result.id = id.clone();
                return result;
            }

            let note = if exited_cleanly {
                "no result reported by the test runner".to_string()
            } else {
                warn!(test = %id, exit, "Test has no result after runner crash");
                format!("test runner crashed before reporting ({})", exit)
            };
            TestCaseResult {
                id: id.clone(),
                status: TestStatus::Failed,
                note: Some(note),
            }
        })
        .collect()
}

/// Runners sometimes report ids with a package prefix
fn take_by_suffix(
    by_id: &mut HashMap<String, TestCaseResult>,
    id: &str,
) -> Option<TestCaseResult> {
    let key = by_id
        .keys()
        .find(|k| k.ends_with(id) || id.ends_with(k.as_str()))
        .cloned()?;
    by_id.remove(&key)
}

/// `calc::tests::test_add: test`
fn parse_cargo_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.strip_suffix(": test"))
        .map(str::to_string)
        .collect()
}

/// `tests/test_calc.py::test_add`
fn parse_pytest_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.contains("::") && !line.contains(' '))
        .map(str::to_string)
        .collect()
}

/// `TestAdd`
fn parse_go_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| {
            (line.starts_with("Test") || line.starts_with("Example"))
                && !line.contains(char::is_whitespace)
        })
        .map(str::to_string)
        .collect()
}

/// `test calc::tests::test_add ... ok`
fn parse_cargo_results(output: &str) -> Vec<TestCaseResult> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.strip_prefix("test ")?;
            let (id, outcome) = rest.split_once(" ... ")?;
            let (status, note) = match outcome.trim() {
                "ok" => (TestStatus::Passed, None),
                "FAILED" => (TestStatus::Failed, None),
                other if other.starts_with("ignored") => (
                    TestStatus::Skipped,
                    other
                        .strip_prefix("ignored, ")
                        .map(str::to_string),
                ),
                _ => return None,
            };
            Some(TestCaseResult {
                id: id.trim().to_string(),
                status,
                note,
            })
        })
        .collect()
}

/// `tests/test_calc.py::test_add PASSED    [ 50%]`
fn parse_pytest_results(output: &str) -> Vec<TestCaseResult> {
    output
        .lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            let id = words.next()?;
            if !id.contains("::") {
                return None;
            }
            let status = match words.next()? {
                "PASSED" | "XPASS" => TestStatus::Passed,
                "FAILED" | "ERROR" => TestStatus::Failed,
                "SKIPPED" | "XFAIL" => TestStatus::Skipped,
                _ => return None,
            };
            let note = line
                .split_once(" - ")
                .map(|(_, reason)| reason.trim().to_string())
                .or_else(|| {
                    let rest: Vec<&str> = words
                        .filter(|w| !w.starts_with('[') && !w.ends_with(']'))
                        .collect();
                    (!rest.is_empty()).then(|| rest.join(" "))
                });
            Some(TestCaseResult {
                id: id.to_string(),
                status,
                note,
            })
        })
        .collect()
}

/// `--- PASS: TestAdd (0.00s)`
fn parse_go_results(output: &str) -> Vec<TestCaseResult> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim_start().strip_prefix("--- ")?;
            let (outcome, rest) = rest.split_once(": ")?;
            let status = match outcome {
                "PASS" => TestStatus::Passed,
                "FAIL" => TestStatus::Failed,
                "SKIP" => TestStatus::Skipped,
                _ => return None,
            };
            let id = rest.split_whitespace().next()?;
            Some(TestCaseResult {
                id: id.to_string(),
                status,
                note: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_detect_cargo_project() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        assert_eq!(
            TestFramework::detect(dir.path()),
            Some(TestFramework::Cargo)
        );
    }

    #[test]
    fn test_detect_go_project() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("go.mod"), "module test").unwrap();
        assert_eq!(TestFramework::detect(dir.path()), Some(TestFramework::Go));
    }

    #[test]
    fn test_detect_pytest_from_tests_dir() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("tests")).unwrap();
        fs::write(dir.path().join("tests/test_calc.py"), "").unwrap();
        assert_eq!(
            TestFramework::detect(dir.path()),
            Some(TestFramework::Pytest)
        );
    }

    #[test]
    fn test_detect_no_framework() {
        let dir = TempDir::new().unwrap();
        assert_eq!(TestFramework::detect(dir.path()), None);
    }

    #[test]
    fn test_parse_cargo_listing() {
        let output = "calc::tests::test_add: test\ncalc::tests::test_sub: test\n\n2 tests, 0 benchmarks\n";
        assert_eq!(
            parse_cargo_listing(output),
            vec!["calc::tests::test_add", "calc::tests::test_sub"]
        );
    }

    #[test]
    fn test_parse_pytest_listing() {
        let output = "tests/test_calc.py::test_add\ntests/test_calc.py::test_sub\n\n2 tests collected in 0.01s\n";
        assert_eq!(parse_pytest_listing(output).len(), 2);
    }

    #[test]
    fn test_parse_cargo_results() {
        let output = r#"
running 3 tests
test calc::tests::test_add ... ok
test calc::tests::test_div ... FAILED
test calc::tests::test_slow ... ignored, takes minutes

test result: FAILED. 1 passed; 1 failed; 1 ignored; 0 measured; 0 filtered out
"#;
        let results = parse_cargo_results(output);
        assert_eq!(results.len(), 3);
        assert_eq!(results[1].status, TestStatus::Failed);
        assert_eq!(results[2].status, TestStatus::Skipped);
        assert_eq!(results[2].note.as_deref(), Some("takes minutes"));
    }

    #[test]
    fn test_parse_pytest_results() {
        let output = r#"
tests/test_calc.py::test_f1 PASSED                                   [ 33%]
tests/test_calc.py::test_f2 FAILED                                   [ 66%]
tests/test_calc.py::test_f3 SKIPPED (needs network)                  [100%]
=========================== short test summary info ============================
FAILED tests/test_calc.py::test_f2 - AssertionError: 3 != 4
"#;
        let results = parse_pytest_results(output);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status, TestStatus::Passed);
        assert_eq!(results[1].status, TestStatus::Failed);
        assert_eq!(results[2].status, TestStatus::Skipped);
        assert_eq!(results[2].note.as_deref(), Some("(needs network)"));
    }

    #[test]
    fn test_parse_go_results() {
        let output = "=== RUN   TestAdd\n--- PASS: TestAdd (0.00s)\n=== RUN   TestDiv\n    --- FAIL: TestDiv (0.01s)\nFAIL\n";
        let results = parse_go_results(output);
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].id, "TestDiv");
        assert_eq!(results[1].status, TestStatus::Failed);
    }

    #[test]
    fn test_reconcile_marks_missing_tests_after_crash() {
        let requested = vec!["test_a".to_string(), "test_b".to_string()];
        let parsed = vec![TestCaseResult {
            id: "test_a".into(),
            status: TestStatus::Passed,
            note: None,
        }];
        let results = reconcile(&requested, parsed, false, "signal: 11");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, TestStatus::Passed);
        assert_eq!(results[1].status, TestStatus::Failed);
        assert!(results[1].note.as_deref().unwrap().contains("crashed"));
    }

    #[test]
    fn test_reconcile_matches_prefixed_ids() {
        let requested = vec!["TestAdd".to_string()];
        let parsed = vec![TestCaseResult {
            id: "pkg/calc.TestAdd".into(),
            status: TestStatus::Passed,
            note: None,
        }];
        let results = reconcile(&requested, parsed, true, "exit status: 0");
        assert_eq!(results[0].id, "TestAdd");
        assert_eq!(results[0].status, TestStatus::Passed);
    }

    #[tokio::test]
    async fn test_run_without_framework_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let executor = LocalTestExecutor::new(dir.path());
        let err = executor.run(&["t".to_string()], None).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Unsupported);
    }

    #[test]
    fn test_target_detects_framework_of_other_tree() {
        let home = TempDir::new().unwrap();
        let checkout = TempDir::new().unwrap();
        fs::write(checkout.path().join("go.mod"), "module calc").unwrap();

        let executor = LocalTestExecutor::new(home.path());
        assert!(executor.target(None).is_err());
        let (dir, framework) = executor.target(Some(checkout.path())).unwrap();
        assert_eq!(dir, checkout.path());
        assert_eq!(framework, TestFramework::Go);
    }

    #[tokio::test]
    async fn test_run_nothing_is_empty() {
        let dir = TempDir::new().unwrap();
        let run = LocalTestExecutor::new(dir.path()).run(&[], None).await.unwrap();
        assert!(run.results.is_empty());
    }
}
