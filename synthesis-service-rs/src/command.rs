// synthesis-service-rs/src/command.rs
// Allowlisted external command execution with timeouts.
//
// The schema provider and the code validator shell out to the grammar
// toolchain. Execution is restricted to a fixed set of binaries and
// arguments are screened for shell metacharacters; stdout and stderr are
// captured separately so interpreter warnings on stderr never corrupt the
// JSON payloads parsed from stdout.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Binaries the synthesis pipeline is allowed to execute.
pub const ALLOWED_COMMANDS: &[&str] = &["loomctl", "ruby", "bundle"];

const COMMAND_METACHARACTERS: &str = "$`;&|><*?[]{}()~";
const ARGUMENT_METACHARACTERS: &str = "$`;&|><*?{}()~";

/// Errors from external command execution.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command not allowed: {0} (not in security allowlist)")]
    NotAllowed(String),

    #[error("argument {index} contains invalid characters: {value}")]
    UnsafeArgument { index: usize, value: String },

    #[error("command not found: {0} (is the grammar toolchain installed?)")]
    NotFound(String),

    #[error("command timed out after {0} seconds")]
    Timeout(u64),

    #[error("io error running command: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured result of a completed command.
///
/// Non-zero exits are not errors at this layer: the validator expects exit
/// code 1 when violations are found, with the violation list on stdout.
#[derive(Debug)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

fn validate_security(program: &str, args: &[&str]) -> Result<(), CommandError> {
    if !ALLOWED_COMMANDS.contains(&program) {
        return Err(CommandError::NotAllowed(program.to_string()));
    }
    if program.contains(|c| COMMAND_METACHARACTERS.contains(c)) {
        return Err(CommandError::NotAllowed(program.to_string()));
    }
    for (index, arg) in args.iter().enumerate() {
        if arg.contains(|c| ARGUMENT_METACHARACTERS.contains(c)) {
            return Err(CommandError::UnsafeArgument {
                index,
                value: (*arg).to_string(),
            });
        }
    }
    Ok(())
}

/// Whether `name` resolves to an executable file on PATH.
pub fn binary_on_path(name: &str) -> bool {
    let path = match std::env::var_os("PATH") {
        Some(p) => p,
        None => return false,
    };
    std::env::split_paths(&path).any(|dir| dir.join(name).is_file())
}

/// Run an allowlisted command with a bounded timeout, optionally feeding
/// `stdin_data` to the child.
pub async fn run_checked(
    program: &str,
    args: &[&str],
    stdin_data: Option<&str>,
    timeout: Duration,
) -> Result<CommandOutput, CommandError> {
    validate_security(program, args)?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if stdin_data.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }

    let mut child = cmd.spawn().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            CommandError::NotFound(program.to_string())
        } else {
            CommandError::Io(err)
        }
    })?;

    if let Some(data) = stdin_data {
        if let Some(mut handle) = child.stdin.take() {
            handle.write_all(data.as_bytes()).await?;
            // Dropping the handle closes the pipe and unblocks the child.
        }
    }

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| CommandError::Timeout(timeout.as_secs()))??;

    Ok(CommandOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
