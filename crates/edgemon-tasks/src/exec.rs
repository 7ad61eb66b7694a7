//! Whitelisted command execution with a hard deadline.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use crate::gate;
use crate::TaskError;

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    /// Stdout, with stderr appended under a `STDERR:` delimiter when
    /// stderr was non-empty.
    pub output: String,
    pub exit_code: i32,
}

/// Run a whitelisted command through the platform shell.
///
/// The gate decides first; nothing is spawned on denial. The child runs
/// in its own process group and the whole group is killed when the
/// deadline passes, so shell pipelines cannot outlive the timeout.
pub async fn execute_command(
    command: &str,
    allowed: &[String],
    scripts_dir: &Path,
    timeout: Duration,
) -> Result<ExecOutcome, TaskError> {
    if !gate::command_allowed(command, allowed, scripts_dir) {
        return Err(TaskError::CommandNotAllowed);
    }

    // Script references run by their resolved absolute path.
    let program = match gate::resolve_script(command, scripts_dir) {
        Some(path) => path.display().to_string(),
        None => command.to_string(),
    };

    info!(command, resolved = %program, ?timeout, "executing whitelisted command");

    let mut cmd = shell_command(&program);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn()?;
    #[cfg(unix)]
    let pid = child.id();

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(result)) => {
            let output = combine_output(
                &String::from_utf8_lossy(&result.stdout),
                &String::from_utf8_lossy(&result.stderr),
            );
            let exit_code = result.status.code().unwrap_or(-1);
            if exit_code != 0 {
                warn!(command, exit_code, "command exited non-zero");
                return Err(TaskError::NonZeroExit { exit_code, output });
            }
            Ok(ExecOutcome { output, exit_code })
        }
        Ok(Err(e)) => Err(TaskError::Io(e)),
        Err(_) => {
            warn!(command, ?timeout, "command timed out, killing process group");
            #[cfg(unix)]
            if let Some(pid) = pid {
                // the child is its own group leader (process_group(0))
                unsafe {
                    libc::killpg(pid as i32, libc::SIGKILL);
                }
            }
            Err(TaskError::Timeout(timeout))
        }
    }
}

#[cfg(unix)]
fn shell_command(program: &str) -> Command {
    let mut cmd = Command::new("/bin/bash");
    cmd.arg("-c").arg(program);
    cmd
}

#[cfg(windows)]
fn shell_command(program: &str) -> Command {
    let mut cmd = Command::new("powershell.exe");
    cmd.args(["-NoProfile", "-NonInteractive", "-Command", program]);
    cmd
}

fn combine_output(stdout: &str, stderr: &str) -> String {
    if stderr.is_empty() {
        return stdout.to_string();
    }
    let mut combined = String::with_capacity(stdout.len() + stderr.len() + 16);
    combined.push_str(stdout);
    if !stdout.is_empty() && !stdout.ends_with('\n') {
        combined.push('\n');
    }
    combined.push_str("STDERR:\n");
    combined.push_str(stderr);
    combined
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn allowed(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|s| s.to_string()).collect()
    }

    fn scripts_dir() -> std::path::PathBuf {
        std::env::temp_dir()
    }

    #[tokio::test]
    async fn denied_commands_never_spawn() {
        let err = execute_command("rm -rf /", &allowed(&["echo hi"]), &scripts_dir(), secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::CommandNotAllowed));
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let outcome = execute_command(
            "echo hello",
            &allowed(&["echo hello"]),
            &scripts_dir(),
            secs(5),
        )
        .await
        .unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.output.trim(), "hello");
    }

    #[tokio::test]
    async fn stderr_is_delimited() {
        let cmd = "echo out; echo err 1>&2";
        let outcome = execute_command(cmd, &allowed(&[cmd]), &scripts_dir(), secs(5))
            .await
            .unwrap();
        let stderr_at = outcome.output.find("STDERR:").expect("missing delimiter");
        assert!(outcome.output[..stderr_at].contains("out"));
        assert!(outcome.output[stderr_at..].contains("err"));
    }

    #[tokio::test]
    async fn nonzero_exit_reports_output_and_error() {
        let cmd = "echo partial; exit 3";
        let err = execute_command(cmd, &allowed(&[cmd]), &scripts_dir(), secs(5))
            .await
            .unwrap_err();
        match err {
            TaskError::NonZeroExit { exit_code, output } => {
                assert_eq!(exit_code, 3);
                assert!(output.contains("partial"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let started = std::time::Instant::now();
        let err = execute_command(
            "sleep 30",
            &allowed(&["sleep 30"]),
            &scripts_dir(),
            Duration::from_millis(300),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TaskError::Timeout(_)), "{err}");
        assert!(started.elapsed() < secs(5), "timeout did not fire promptly");
    }

    #[tokio::test]
    async fn scripts_run_from_the_scripts_directory() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("greet.sh");
        std::fs::write(&script, "#!/bin/bash\necho from-script\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let outcome = execute_command("greet.sh", &[], dir.path(), secs(5))
            .await
            .unwrap();
        assert!(outcome.output.contains("from-script"));
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }
}
