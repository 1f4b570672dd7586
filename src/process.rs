use std::ffi::OsString;
use std::process::{Command, ExitStatus};

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};

/// Outcome of an external command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code, or -1 if the process was killed by a signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }
}

/// Builder for a single external command invocation.
///
/// Output is always captured. A nonzero exit is turned into an error
/// carrying the program name, exit code and the tail of stderr.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<OsString>,
    envs: Vec<(String, String)>,
    current_dir: Option<Utf8PathBuf>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn dir(mut self, dir: &Utf8Path) -> Self {
        self.current_dir = Some(dir.to_owned());
        self
    }

    /// Human-readable rendering of the command line, for logs and errors.
    pub fn display(&self) -> String {
        let mut s = self.program.clone();
        for arg in &self.args {
            s.push(' ');
            s.push_str(&arg.to_string_lossy());
        }
        s
    }

    pub fn run(self) -> Result<CommandResult> {
        let cmdline = self.display();
        tracing::debug!("running: {cmdline}");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (k, v) in &self.envs {
            cmd.env(k, v);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .with_context(|| format!("executing {}", self.program))?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        for line in result.stdout.lines() {
            tracing::debug!("{}: {line}", self.program);
        }
        for line in result.stderr.lines() {
            tracing::debug!("{} (stderr): {line}", self.program);
        }

        if !result.success() {
            let stderr = result.stderr.trim();
            if stderr.is_empty() {
                bail!("`{cmdline}` failed (exit code {})", result.code());
            }
            bail!(
                "`{cmdline}` failed (exit code {}):\n{}",
                result.code(),
                tail(stderr, 20)
            );
        }

        Ok(result)
    }
}

/// Last `n` lines of `s`.
fn tail(s: &str, n: usize) -> String {
    let lines: Vec<&str> = s.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_captures_stdout() {
        let result = Cmd::new("echo").args(["hello", "world"]).run().unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello world");
    }

    #[test]
    fn test_run_failure_includes_stderr() {
        let err = Cmd::new("sh")
            .args(["-c", "echo boom >&2; exit 3"])
            .run()
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exit code 3"), "{msg}");
        assert!(msg.contains("boom"), "{msg}");
    }

    #[test]
    fn test_run_failure_without_stderr() {
        let err = Cmd::new("false").run().unwrap_err();
        assert!(err.to_string().contains("exit code 1"));
    }

    #[test]
    fn test_env_and_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let result = Cmd::new("sh")
            .args(["-c", "echo $FOO; pwd"])
            .env("FOO", "bar")
            .dir(dir)
            .run()
            .unwrap();
        let mut lines = result.stdout.lines();
        assert_eq!(lines.next(), Some("bar"));
        let pwd = lines.next().unwrap();
        assert_eq!(
            std::fs::canonicalize(pwd).unwrap(),
            std::fs::canonicalize(dir).unwrap()
        );
    }

    #[test]
    fn test_missing_program() {
        assert!(Cmd::new("nonexistent_program_12345").run().is_err());
    }

    #[test]
    fn test_display() {
        let cmd = Cmd::new("chroot").args(["/tmp/root", "locale-gen"]);
        assert_eq!(cmd.display(), "chroot /tmp/root locale-gen");
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail("a\nb\nc", 2), "b\nc");
        assert_eq!(tail("a", 5), "a");
    }
}
