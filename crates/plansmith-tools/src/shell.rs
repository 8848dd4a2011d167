use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wait_timeout::ChildExt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellRunResult {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ShellRunResult {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status == Some(0)
    }
}

pub trait ShellRunner: Send + Sync {
    /// Runs `cmd` through the platform shell. `None` waits without bound.
    fn run(&self, cmd: &str, cwd: &Path, timeout: Option<Duration>) -> Result<ShellRunResult>;
}

#[derive(Debug, Default)]
pub struct PlatformShellRunner;

impl ShellRunner for PlatformShellRunner {
    fn run(&self, cmd: &str, cwd: &Path, timeout: Option<Duration>) -> Result<ShellRunResult> {
        let mut child = spawn_command(cmd, cwd)?;

        let Some(timeout) = timeout else {
            let output = child.wait_with_output()?;
            return Ok(collect(output.status, &output.stdout, &output.stderr, false));
        };
        // Pipes are drained while waiting so a chatty command cannot fill
        // them and stall until the deadline.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let timed_out = match child.wait_timeout(timeout)? {
            Some(_) => false,
            None => {
                child.kill()?;
                true
            }
        };
        let status = child.wait()?;
        let stdout = join_drain(stdout)?;
        let stderr = join_drain(stderr)?;
        Ok(collect(status, &stdout, &stderr, timed_out))
    }
}

type Drain = Option<JoinHandle<std::io::Result<Vec<u8>>>>;

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Drain {
    pipe.map(|mut pipe| {
        thread::spawn(move || -> std::io::Result<Vec<u8>> {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf)?;
            Ok(buf)
        })
    })
}

fn join_drain(handle: Drain) -> Result<Vec<u8>> {
    let Some(handle) = handle else {
        return Ok(Vec::new());
    };
    let buf = handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))??;
    Ok(buf)
}

fn collect(status: ExitStatus, stdout: &[u8], stderr: &[u8], timed_out: bool) -> ShellRunResult {
    ShellRunResult {
        status: status.code(),
        stdout: String::from_utf8_lossy(stdout).to_string(),
        stderr: String::from_utf8_lossy(stderr).to_string(),
        timed_out,
    }
}

fn spawn_command(cmd: &str, cwd: &Path) -> Result<Child> {
    let cwd = if cwd.exists() {
        std::fs::canonicalize(cwd).unwrap_or_else(|_| cwd.to_path_buf())
    } else {
        cwd.to_path_buf()
    };
    let mut errors = Vec::new();
    for mut command in candidate_commands(cmd) {
        command.current_dir(&cwd);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.stdin(Stdio::null());
        let program = command.get_program().to_string_lossy().to_string();
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(err) => errors.push(format!("{program}: {err}")),
        }
    }
    Err(anyhow!(
        "failed to spawn command '{cmd}' in '{}': {}",
        cwd.display(),
        errors.join(" | ")
    ))
}

#[cfg(target_os = "windows")]
fn candidate_commands(cmd: &str) -> Vec<Command> {
    let mut cmd_shell = Command::new("cmd");
    cmd_shell.arg("/C").arg(cmd);

    let mut ps_shell = Command::new("powershell");
    ps_shell
        .arg("-NoLogo")
        .arg("-NoProfile")
        .arg("-Command")
        .arg(cmd);

    vec![cmd_shell, ps_shell]
}

#[cfg(not(target_os = "windows"))]
fn candidate_commands(cmd: &str) -> Vec<Command> {
    let mut sh_shell = Command::new("sh");
    sh_shell.arg("-c").arg(cmd);

    let mut bash_shell = Command::new("bash");
    bash_shell.arg("-c").arg(cmd);

    vec![sh_shell, bash_shell]
}
