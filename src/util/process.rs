//! Execution of external programs under a deadline.

use std::io::{self, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use derive_more::{Display, Error};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exit status and interleaved stdout/stderr of a finished process.
#[derive(Debug)]
pub struct Output {
    pub status: ExitStatus,
    pub combined: Vec<u8>,
}

/// Errors on running an external program.
#[derive(Debug, Display, Error)]
pub enum ProcessError {
    /// The program couldn't be started.
    #[display("Starting {program} failed: {source}")]
    Spawn { program: String, source: io::Error },
    /// The state of the running program couldn't be queried.
    #[display("Waiting for {program} failed: {source}")]
    Wait { program: String, source: io::Error },
    /// The program exceeded its deadline and was killed.
    #[display("{program} timed out after {}s", timeout.as_secs())]
    TimedOut {
        program: String,
        timeout: Duration,
        /// Output captured until the program was killed.
        output: Vec<u8>,
    },
}

/// Runs `command` to completion and captures its combined output.
///
/// If `timeout` elapses before the process exits, the process is killed
/// and [ProcessError::TimedOut] is returned. Stdin is closed.
pub fn run_bounded(mut command: Command, timeout: Option<Duration>) -> Result<Output, ProcessError> {
    let program = command.get_program().to_string_lossy().into_owned();
    let spawn_err = |source: io::Error| ProcessError::Spawn {
        program: program.clone(),
        source,
    };

    let (mut reader, writer) = io::pipe().map_err(spawn_err)?;
    let writer_stderr = writer.try_clone().map_err(spawn_err)?;
    command
        .stdin(Stdio::null())
        .stdout(writer)
        .stderr(writer_stderr);

    let mut child = command.spawn().map_err(spawn_err)?;
    // the command still owns the write ends, the reader only sees EOF once they are gone
    drop(command);
    log::trace!(target: "process", "Started {program} (pid {})", child.id());

    let captured = Arc::new(Mutex::new(Vec::new()));
    let reader_thread = {
        let captured = Arc::clone(&captured);
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => lock(&captured).extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        log::warn!(target: "process", "Reading process output failed: {e}");
                        break;
                    }
                }
            }
        })
    };

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(source) => {
                if let Err(e) = child.kill() {
                    log::warn!(target: "process", "Killing {program} failed: {e}");
                }
                let _ = child.wait();
                return Err(ProcessError::Wait { program, source });
            }
        }

        if let Some(timeout) = timeout.filter(|timeout| started.elapsed() >= *timeout) {
            log::warn!(target: "process", "{program} exceeded {}s, killing it", timeout.as_secs());
            if let Err(e) = child.kill() {
                log::warn!(target: "process", "Killing {program} failed: {e}");
            }
            let _ = child.wait();

            // Descendants of the child may keep the pipe open, so the reader
            // thread is not joined here.
            let output = std::mem::take(&mut *lock(&captured));
            return Err(ProcessError::TimedOut {
                program,
                timeout,
                output,
            });
        }

        thread::sleep(POLL_INTERVAL);
    };

    if reader_thread.join().is_err() {
        log::warn!(target: "process", "Output reader of {program} panicked");
    }
    let combined = std::mem::take(&mut *lock(&captured));
    log::trace!(target: "process", "{program} exited with {status} after {:?}", started.elapsed());

    Ok(Output { status, combined })
}

fn lock(buffer: &Mutex<Vec<u8>>) -> std::sync::MutexGuard<'_, Vec<u8>> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Folds process output into a single line.
pub fn collapse(output: &[u8]) -> String {
    String::from_utf8_lossy(output).trim_end().replace('\n', " ")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn captures_stdout_and_stderr() {
        let output = run_bounded(sh("echo out; echo err >&2"), None).unwrap();

        assert!(output.status.success());
        let combined = String::from_utf8(output.combined).unwrap();
        assert!(combined.contains("out"));
        assert!(combined.contains("err"));
    }

    #[test]
    fn failing_exit_is_not_an_error() {
        let output = run_bounded(sh("echo broken >&2; exit 3"), Some(Duration::from_secs(30))).unwrap();

        assert_eq!(output.status.code(), Some(3));
        assert_eq!(collapse(&output.combined), "broken");
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let err = run_bounded(Command::new("/nonexistent/dump-tool"), None).unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[test]
    fn deadline_kills_the_process() {
        let started = Instant::now();
        let err = run_bounded(
            sh("echo starting; sleep 30"),
            Some(Duration::from_millis(300)),
        )
        .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(10));
        match err {
            ProcessError::TimedOut { timeout, output, .. } => {
                assert_eq!(timeout, Duration::from_millis(300));
                assert_eq!(collapse(&output), "starting");
            }
            other => panic!("expected timeout, got {other}"),
        }
    }

    #[test]
    fn collapse_joins_lines() {
        assert_eq!(collapse(b"line one\nline two\n\n"), "line one line two");
        assert_eq!(collapse(b""), "");
    }
}
