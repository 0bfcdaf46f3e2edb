use crate::config::ExecutionConfig;
use crate::environment::EnvironmentBuilder;
use crate::storage::{CommandDefinition, ExecutionResult, InputValueSet};
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use wait_timeout::ChildExt;

/// Expands a leading `~` to `home`.
pub fn expand_home(command: &str, home: &Path) -> String {
    let home = home.to_string_lossy();
    if command == "~" {
        home.into_owned()
    } else if let Some(rest) = command.strip_prefix("~/") {
        format!("{}/{}", home.trim_end_matches('/'), rest)
    } else {
        command.to_string()
    }
}

/// stdout followed by stderr, newline-separated only when stdout has content.
pub fn combine_output(stdout: &str, stderr: &str) -> String {
    let mut output = stdout.to_string();
    if !stderr.is_empty() {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(stderr);
    }
    output
}

pub fn timeout_message(timeout: Duration) -> String {
    let secs = timeout.as_secs();
    let (amount, unit) = if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    let plural = if amount == 1 { "" } else { "s" };
    format!("Command timed out after {} {}{}", amount, unit, plural)
}

enum Outcome {
    Exited {
        status: ExitStatus,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    TimedOut,
}

pub struct CommandExecutor {
    shell: String,
    login_shell: bool,
    timeout: Duration,
    env: EnvironmentBuilder,
}

impl CommandExecutor {
    pub fn new(
        shell: impl Into<String>,
        login_shell: bool,
        timeout: Duration,
        env: EnvironmentBuilder,
    ) -> Self {
        Self {
            shell: shell.into(),
            login_shell,
            timeout,
            env,
        }
    }

    pub fn from_config(config: &ExecutionConfig, home: PathBuf) -> Self {
        Self::new(
            config.shell.clone(),
            config.login_shell,
            config.timeout(),
            EnvironmentBuilder::new(config.strip_env.clone(), home),
        )
    }

    /// Runs `definition` to completion or until the timeout. Never fails:
    /// every problem is reported through the returned result.
    pub fn execute(
        &self,
        definition: &CommandDefinition,
        overrides: Option<&InputValueSet>,
    ) -> ExecutionResult {
        let command = expand_home(&definition.command, self.env.home());
        info!(command_id = %definition.id, command = %command, "executing command");

        let env = self.env.build_from_process(overrides);
        let start_time = Instant::now();

        match self.run(&command, env) {
            Ok(Outcome::Exited {
                status,
                stdout,
                stderr,
            }) => {
                let exit_code = status.code().unwrap_or(-1);
                info!(
                    command_id = %definition.id,
                    exit_code,
                    elapsed_ms = start_time.elapsed().as_millis() as u64,
                    "command finished"
                );
                ExecutionResult {
                    success: exit_code == 0,
                    output: combine_output(
                        &String::from_utf8_lossy(&stdout),
                        &String::from_utf8_lossy(&stderr),
                    ),
                    exit_code,
                }
            }
            Ok(Outcome::TimedOut) => {
                warn!(
                    command_id = %definition.id,
                    timeout_secs = self.timeout.as_secs(),
                    "command timed out and was killed"
                );
                ExecutionResult::failure(timeout_message(self.timeout))
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!(command_id = %definition.id, error = %message, "failed to execute command");
                ExecutionResult::failure(message)
            }
        }
    }

    fn run(&self, command: &str, env: BTreeMap<OsString, OsString>) -> Result<Outcome> {
        let deadline = Instant::now() + self.timeout;

        let mut cmd = Command::new(&self.shell);
        if self.login_shell {
            cmd.arg("-l");
        }
        cmd.arg("-c")
            .arg(command)
            .current_dir(self.env.home())
            .env_clear()
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so a timeout can take down everything the shell started.
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.shell))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("failed to capture stderr"))?;
        let stdout_rx = spawn_reader(stdout);
        let stderr_rx = spawn_reader(stderr);

        let status = match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                terminate(&mut child);
                return Ok(Outcome::TimedOut);
            }
            Err(e) => {
                terminate(&mut child);
                return Err(e).context("failed while waiting for command");
            }
        };

        // Background jobs can keep the pipes open after the shell exits.
        let Some(stdout) = receive(&stdout_rx, deadline, "stdout")? else {
            terminate(&mut child);
            return Ok(Outcome::TimedOut);
        };
        let Some(stderr) = receive(&stderr_rx, deadline, "stderr")? else {
            terminate(&mut child);
            return Ok(Outcome::TimedOut);
        };

        Ok(Outcome::Exited {
            status,
            stdout,
            stderr,
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> Receiver<std::io::Result<Vec<u8>>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buffer = [0u8; 4096];
        let mut collected = Vec::new();
        let result = loop {
            match reader.read(&mut buffer) {
                Ok(0) => break Ok(collected),
                Ok(bytes_read) => collected.extend_from_slice(&buffer[..bytes_read]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };
        let _ = tx.send(result);
    });
    rx
}

fn receive(
    rx: &Receiver<std::io::Result<Vec<u8>>>,
    deadline: Instant,
    stream: &str,
) -> Result<Option<Vec<u8>>> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(remaining) {
        Ok(result) => Ok(Some(
            result.with_context(|| format!("failed to read {}", stream))?,
        )),
        Err(RecvTimeoutError::Timeout) => Ok(None),
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("{} reader stopped unexpectedly", stream)),
    }
}

fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        let _ = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL);
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn executor(home: &Path, timeout: Duration) -> CommandExecutor {
        CommandExecutor::new(
            "/bin/sh",
            false,
            timeout,
            EnvironmentBuilder::new(
                vec!["LD_LIBRARY_PATH".to_string(), "LD_PRELOAD".to_string()],
                home,
            ),
        )
    }

    fn home() -> anyhow::Result<(TempDir, PathBuf)> {
        let dir = tempdir()?;
        let path = dir.path().canonicalize()?;
        Ok((dir, path))
    }

    fn def(command: &str) -> CommandDefinition {
        let mut def = CommandDefinition::new("test", command);
        def.id = "test".to_string();
        def
    }

    #[test]
    fn expand_home_only_touches_a_leading_tilde() {
        let home = Path::new("/home/deck");
        assert_eq!(expand_home("~/bin/run.sh -v", home), "/home/deck/bin/run.sh -v");
        assert_eq!(expand_home("~", home), "/home/deck");
        assert_eq!(expand_home("echo ~/x", home), "echo ~/x");
        assert_eq!(expand_home("~other/x", home), "~other/x");
    }

    #[test]
    fn combine_output_joins_streams() {
        assert_eq!(combine_output("out\n", ""), "out\n");
        assert_eq!(combine_output("", "err\n"), "err\n");
        assert_eq!(combine_output("out\n", "err\n"), "out\n\nerr\n");
        assert_eq!(combine_output("", ""), "");
    }

    #[test]
    fn timeout_message_renders_minutes_and_seconds() {
        assert_eq!(
            timeout_message(Duration::from_secs(300)),
            "Command timed out after 5 minutes"
        );
        assert_eq!(
            timeout_message(Duration::from_secs(60)),
            "Command timed out after 1 minute"
        );
        assert_eq!(
            timeout_message(Duration::from_secs(1)),
            "Command timed out after 1 second"
        );
        assert_eq!(
            timeout_message(Duration::from_secs(90)),
            "Command timed out after 90 seconds"
        );
    }

    #[test]
    fn echo_succeeds() -> anyhow::Result<()> {
        let (_dir, home) = home()?;
        let result = executor(&home, Duration::from_secs(10)).execute(&def("echo hello"), None);
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("hello"));
        Ok(())
    }

    #[test]
    fn stderr_is_captured_with_real_exit_code() -> anyhow::Result<()> {
        let (_dir, home) = home()?;
        let exec = executor(&home, Duration::from_secs(10));

        let result = exec.execute(&def(">&2 echo oops"), None);
        assert!(result.success);
        assert_eq!(result.output, "oops\n");

        let result = exec.execute(&def("echo out; >&2 echo oops; exit 3"), None);
        assert!(!result.success);
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.output, "out\n\noops\n");
        Ok(())
    }

    #[test]
    fn overrides_reach_the_child() -> anyhow::Result<()> {
        let (_dir, home) = home()?;
        let mut overrides = InputValueSet::new();
        overrides.insert("FOO", "bar");
        overrides.insert("FLAG", true);

        let result = executor(&home, Duration::from_secs(10))
            .execute(&def("echo $FOO $FLAG"), Some(&overrides));
        assert!(result.success);
        assert_eq!(result.output, "bar 1\n");
        Ok(())
    }

    #[test]
    fn runs_in_user_home_without_host_library_path() -> anyhow::Result<()> {
        let (_dir, home) = home()?;
        let result = executor(&home, Duration::from_secs(10)).execute(
            &def("pwd; echo $HOME; echo ${LD_LIBRARY_PATH-unset}; echo ${LD_PRELOAD-unset}"),
            None,
        );
        let expected = format!(
            "{home}\n{home}\nunset\nunset\n",
            home = home.display()
        );
        assert_eq!(result.output, expected);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn leading_tilde_resolves_against_user_home() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, home) = home()?;
        let script = home.join("greet.sh");
        std::fs::write(&script, "#!/bin/sh\necho from-script \"$1\"\n")?;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;

        let result =
            executor(&home, Duration::from_secs(10)).execute(&def("~/greet.sh deck"), None);
        assert!(result.success, "{}", result.output);
        assert_eq!(result.output, "from-script deck\n");
        Ok(())
    }

    #[test]
    fn spawn_failure_maps_to_negative_result() -> anyhow::Result<()> {
        let (_dir, home) = home()?;
        let exec = CommandExecutor::new(
            "/definitely/not/a/shell",
            false,
            Duration::from_secs(5),
            EnvironmentBuilder::new(Vec::new(), &home),
        );
        let result = exec.execute(&def("echo hi"), None);
        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert!(result.output.contains("failed to spawn /definitely/not/a/shell"));
        Ok(())
    }

    #[test]
    fn signal_termination_reports_minus_one() -> anyhow::Result<()> {
        let (_dir, home) = home()?;
        let result = executor(&home, Duration::from_secs(10)).execute(&def("kill -9 $$"), None);
        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        Ok(())
    }

    #[test]
    fn timeout_kills_the_whole_process_group() -> anyhow::Result<()> {
        let (_dir, home) = home()?;
        let pid_file = home.join("bg.pid");
        let command = format!("sleep 30 & echo $! > {}; wait", pid_file.display());

        let started = Instant::now();
        let result = executor(&home, Duration::from_secs(1)).execute(&def(&command), None);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.output, "Command timed out after 1 second");

        #[cfg(target_os = "linux")]
        {
            let pid = std::fs::read_to_string(&pid_file)?.trim().to_string();
            thread::sleep(Duration::from_millis(300));
            if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
                let state = stat
                    .rsplit_once(')')
                    .and_then(|(_, rest)| rest.trim_start().chars().next());
                assert!(
                    matches!(state, Some('Z') | Some('X')),
                    "background sleep still running: {}",
                    stat
                );
            }
        }
        Ok(())
    }

    #[test]
    fn background_job_holding_pipes_counts_against_timeout() -> anyhow::Result<()> {
        let (_dir, home) = home()?;
        let started = Instant::now();
        let result =
            executor(&home, Duration::from_secs(1)).execute(&def("sleep 30 & echo started"), None);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(result.exit_code, -1);
        assert!(result.output.starts_with("Command timed out after"));
        Ok(())
    }
}
