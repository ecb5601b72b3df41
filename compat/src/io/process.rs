//! Helpers for running child processes with streamed, bounded output.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::{debug, error, info, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    /// Lines (stdout and stderr) matching [`StreamOptions::flag_pattern`].
    pub flagged_lines: usize,
}

impl CommandOutput {
    /// Stdout followed by stderr, lossily decoded.
    pub fn combined_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&self.stderr));
        text
    }
}

/// How a child's output is streamed while it runs.
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions<'a> {
    /// Label attached to forwarded lines (e.g. `build`, `jbang`).
    pub label: &'a str,
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Bytes of stdout/stderr kept in memory (the rest is drained and discarded).
    pub output_limit_bytes: usize,
    /// When set, every line is appended to this file as it is produced.
    pub log_path: Option<&'a Path>,
    /// Forward each line to tracing as it is produced.
    pub forward: bool,
    /// Count lines matching this pattern.
    pub flag_pattern: Option<&'a Regex>,
}

impl<'a> StreamOptions<'a> {
    pub fn new(label: &'a str, output_limit_bytes: usize) -> Self {
        Self {
            label,
            timeout: None,
            output_limit_bytes,
            log_path: None,
            forward: true,
            flag_pattern: None,
        }
    }
}

type SharedLog = Arc<Option<Mutex<BufWriter<File>>>>;

struct StreamResult {
    collected: Vec<u8>,
    truncated: usize,
    flagged: usize,
}

/// Run a command, streaming stdout and stderr line by line while it runs.
///
/// Both pipes are read concurrently so the child can never block on a full
/// pipe. Lines are forwarded to tracing and tee'd to `log_path` as they
/// arrive, which keeps long or hung builds diagnosable.
#[instrument(skip_all, fields(label = options.label, timeout_secs = options.timeout.map(|t| t.as_secs())))]
pub fn run_streaming(mut cmd: Command, options: &StreamOptions<'_>) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let log: SharedLog = Arc::new(match options.log_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create log dir {}", parent.display()))?;
            }
            let file = File::create(path)
                .with_context(|| format!("create log file {}", path.display()))?;
            Some(Mutex::new(BufWriter::new(file)))
        }
        None => None,
    });

    debug!(program = ?cmd.get_program(), args = ?cmd.get_args().collect::<Vec<_>>(), "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, program = ?cmd.get_program(), "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {:?}", cmd.get_program()));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = spawn_reader(stdout, options, log.clone());
    let stderr_handle = spawn_reader(stderr, options, log);

    let mut timed_out = false;
    let status = match options.timeout {
        Some(timeout) => match child.wait_timeout(timeout).context("wait for command")? {
            Some(status) => status,
            None => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "command timed out, killing"
                );
                timed_out = true;
                child.kill().context("kill command")?;
                child.wait().context("wait command after kill")?
            }
        },
        None => child.wait().context("wait for command")?,
    };

    let stdout = join_reader(stdout_handle).context("join stdout")?;
    let stderr = join_reader(stderr_handle).context("join stderr")?;

    if stdout.truncated > 0 || stderr.truncated > 0 {
        warn!(
            stdout_truncated = stdout.truncated,
            stderr_truncated = stderr.truncated,
            "output truncated"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout: stdout.collected,
        stderr: stderr.collected,
        stdout_truncated: stdout.truncated,
        stderr_truncated: stderr.truncated,
        timed_out,
        flagged_lines: stdout.flagged + stderr.flagged,
    })
}

fn spawn_reader<R: Read + Send + 'static>(
    reader: R,
    options: &StreamOptions<'_>,
    log: SharedLog,
) -> thread::JoinHandle<Result<StreamResult>> {
    let label = options.label.to_string();
    let limit = options.output_limit_bytes;
    let forward = options.forward;
    let pattern = options.flag_pattern.cloned();
    thread::spawn(move || read_lines(reader, &label, limit, forward, pattern.as_ref(), &log))
}

fn join_reader(handle: thread::JoinHandle<Result<StreamResult>>) -> Result<StreamResult> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read a stream line by line with a size limit, forwarding and tee-ing each line.
fn read_lines<R: Read>(
    reader: R,
    label: &str,
    limit: usize,
    forward: bool,
    pattern: Option<&Regex>,
    log: &SharedLog,
) -> Result<StreamResult> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;
    let mut flagged = 0usize;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\r', '\n']);
        if forward {
            info!(target: "compat::build", label, "{text}");
        }
        if let Some(pattern) = pattern
            && pattern.is_match(text)
        {
            flagged += 1;
        }

        if let Some(ref mutex) = **log
            && let Ok(mut writer) = mutex.lock()
        {
            // Flush per line so the log is readable while the child runs.
            if let Err(e) = writer.write_all(&line) {
                warn!(err = %e, "failed to write to log file");
            } else if let Err(e) = writer.flush() {
                warn!(err = %e, "failed to flush log file");
            }
        }

        let remaining = limit.saturating_sub(collected.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            collected.extend_from_slice(&line[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok(StreamResult {
        collected,
        truncated,
        flagged,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_both_streams_and_exit_status() {
        let output = run_streaming(
            sh("echo out; echo err 1>&2; exit 3"),
            &StreamOptions::new("test", 1024),
        )
        .expect("run");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout, b"out\n");
        assert_eq!(output.stderr, b"err\n");
        assert_eq!(output.combined_text(), "out\nerr\n");
        assert!(!output.timed_out);
    }

    #[test]
    fn truncates_beyond_limit_but_drains_pipe() {
        let output = run_streaming(sh("echo 0123456789"), &StreamOptions::new("test", 4))
            .expect("run");
        assert!(output.status.success());
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 7);
    }

    #[test]
    fn tees_lines_to_log_and_counts_flagged_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log_path = temp.path().join("logs/build.log");
        let pattern = Regex::new("(?i)error").expect("regex");
        let options = StreamOptions {
            log_path: Some(&log_path),
            flag_pattern: Some(&pattern),
            ..StreamOptions::new("build", 1024)
        };
        let output = run_streaming(
            sh("echo '[INFO] ok'; echo '[ERROR] boom'; echo 'no errors found' 1>&2"),
            &options,
        )
        .expect("run");
        assert!(output.status.success());
        assert_eq!(output.flagged_lines, 2);
        let log = std::fs::read_to_string(&log_path).expect("read log");
        assert!(log.contains("[INFO] ok\n"));
        assert!(log.contains("[ERROR] boom\n"));
    }

    #[test]
    fn kills_command_after_timeout() {
        let options = StreamOptions {
            timeout: Some(Duration::from_millis(200)),
            ..StreamOptions::new("test", 1024)
        };
        let output = run_streaming(sh("exec sleep 5"), &options).expect("run");
        assert!(output.timed_out);
        assert!(!output.status.success());
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let err = run_streaming(
            Command::new("definitely-not-a-real-binary-compat"),
            &StreamOptions::new("test", 16),
        )
        .expect_err("spawn fails");
        assert!(format!("{err:#}").contains("spawn"));
    }
}
