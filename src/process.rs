//! External command execution helpers.
//!
//! Every tool invocation in this crate (skopeo, umoci, losetup, mount,
//! mkfs.*, mksquashfs) goes through [`Cmd`], which captures output by
//! default and turns non-zero exit statuses into errors carrying the
//! command line and the tool's own output.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::{Command, Stdio};

/// Check whether a command is resolvable on the host PATH.
pub fn exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Result of a captured command run.
#[derive(Debug)]
pub struct CmdResult {
    success: bool,
    /// Captured stdout, UTF-8 lossy.
    pub stdout: String,
    /// Captured stderr, UTF-8 lossy.
    pub stderr: String,
}

impl CmdResult {
    pub fn success(&self) -> bool {
        self.success
    }
}

/// Builder for external command invocations.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    error_msg: Option<String>,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            error_msg: None,
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.display().to_string());
        self
    }

    /// Message to use when the command fails (prepended to the tool output).
    pub fn error_msg(mut self, msg: &str) -> Self {
        self.error_msg = Some(msg.to_string());
        self
    }

    /// A non-zero exit status becomes a `CmdResult` with `success() == false`
    /// instead of an error.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    /// Run the command, capturing stdout and stderr.
    pub fn run(self) -> Result<CmdResult> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to run '{}'", self.command_line()))?;

        let result = CmdResult {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success && !self.allow_fail {
            let msg = self
                .error_msg
                .clone()
                .unwrap_or_else(|| format!("Command '{}' failed", self.command_line()));
            bail!(
                "{}\n--- output ---\n{}\n{}",
                msg,
                result.stdout.trim_end(),
                result.stderr.trim_end()
            );
        }

        Ok(result)
    }

    /// Run the command with inherited stdio, streaming output to the
    /// terminal. Used in verbose mode and for long-running tools whose
    /// progress output is worth seeing.
    pub fn run_interactive(self) -> Result<()> {
        println!("  Running: {}", self.command_line());
        let status = Command::new(&self.program)
            .args(&self.args)
            .status()
            .with_context(|| format!("Failed to run '{}'", self.command_line()))?;

        if !status.success() && !self.allow_fail {
            let msg = self
                .error_msg
                .clone()
                .unwrap_or_else(|| format!("Command '{}' failed", self.command_line()));
            bail!("{}", msg);
        }

        Ok(())
    }
}
