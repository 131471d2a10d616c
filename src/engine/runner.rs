//! Child process invocation with captured output

use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::ffi::OsString;
use std::fs::File;
use std::io::Read;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Stdio};
use tracing::debug;

/// Bytes of combined output kept for arbitration
pub const CAPTURE_LIMIT: usize = 4096;

/// Longest line handed to a line callback; longer runs are split
const LINE_LIMIT: usize = CAPTURE_LIMIT;

/// How the child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Regular exit with a status code
    Exited(i32),
    /// Killed by a signal
    Signaled(i32),
}

impl From<ExitStatus> for ExitKind {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Exited(code),
            (None, Some(signal)) => Self::Signaled(signal),
            (None, None) => Self::Exited(-1),
        }
    }
}

/// Exit status plus the retained head of the output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// How the child ended
    pub status: ExitKind,
    /// Combined stdout and stderr, truncated
    pub output: String,
}

impl Outcome {
    /// Outcome for a child that never started
    pub fn spawn_failure(err: &std::io::Error) -> Self {
        let code = if err.kind() == std::io::ErrorKind::NotFound {
            127
        } else {
            126
        };
        Self {
            status: ExitKind::Exited(code),
            output: err.to_string(),
        }
    }

    /// Exit code, or `None` when signalled
    pub fn code(&self) -> Option<i32> {
        match self.status {
            ExitKind::Exited(code) => Some(code),
            ExitKind::Signaled(_) => None,
        }
    }

    /// Signal number, or 0
    pub fn signal(&self) -> i32 {
        match self.status {
            ExitKind::Exited(_) => 0,
            ExitKind::Signaled(signal) => signal,
        }
    }
}

/// Runs the copy tool; replaced by a scripted fake in tests
pub trait Invoker: Send + Sync {
    /// Run `argv` to completion
    fn run(&self, argv: &[OsString]) -> Outcome {
        self.run_streaming(argv, &mut |_| {})
    }

    /// Run `argv`, handing each output line to `on_line` as it arrives
    fn run_streaming(&self, argv: &[OsString], on_line: &mut dyn FnMut(&str)) -> Outcome;
}

/// Real child processes with stdout and stderr joined on one pipe
#[derive(Debug, Clone)]
pub struct SubprocessInvoker {
    capture_limit: usize,
}

impl SubprocessInvoker {
    /// Create an invoker keeping at most `capture_limit` bytes of output
    pub fn new(capture_limit: usize) -> Self {
        Self { capture_limit }
    }
}

impl Default for SubprocessInvoker {
    fn default() -> Self {
        Self::new(CAPTURE_LIMIT)
    }
}

impl Invoker for SubprocessInvoker {
    fn run_streaming(&self, argv: &[OsString], on_line: &mut dyn FnMut(&str)) -> Outcome {
        let Some((program, args)) = argv.split_first() else {
            return Outcome::spawn_failure(&std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty argument vector",
            ));
        };

        // close-on-exec keeps concurrent children from holding our write end
        let (read_end, write_end) = match pipe2(OFlag::O_CLOEXEC) {
            Ok(fds) => fds,
            Err(errno) => return Outcome::spawn_failure(&std::io::Error::from(errno)),
        };
        let write_err = match write_end.try_clone() {
            Ok(fd) => fd,
            Err(e) => return Outcome::spawn_failure(&e),
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(write_end))
            .stderr(Stdio::from(write_err));
        let spawned = command.spawn();
        // the parent's copies of the write end must go before reading
        drop(command);

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                debug!("unable to start {:?}: {}", program, e);
                return Outcome::spawn_failure(&e);
            }
        };

        let output = capture(File::from(read_end), self.capture_limit, on_line);
        let status = match child.wait() {
            Ok(status) => ExitKind::from(status),
            Err(e) => return Outcome::spawn_failure(&e),
        };
        Outcome { status, output }
    }
}

/// Read to EOF, keeping the first `limit` bytes
///
/// Lines end at `\n` or `\r`; anything past the retained head is only
/// passed through `on_line` and never accumulated.
fn capture(mut reader: File, limit: usize, on_line: &mut dyn FnMut(&str)) -> String {
    let mut kept: Vec<u8> = Vec::with_capacity(limit.min(CAPTURE_LIMIT));
    let mut line: Vec<u8> = Vec::with_capacity(LINE_LIMIT);
    let mut chunk = [0u8; 8192];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("reading child output: {}", e);
                break;
            }
        };
        let data = &chunk[..n];
        let room = limit.saturating_sub(kept.len());
        kept.extend_from_slice(&data[..n.min(room)]);

        for &byte in data {
            if byte == b'\n' || byte == b'\r' {
                emit_line(&line, on_line);
                line.clear();
            } else {
                line.push(byte);
                if line.len() >= LINE_LIMIT {
                    emit_line(&line, on_line);
                    line.clear();
                }
            }
        }
    }
    emit_line(&line, on_line);
    String::from_utf8_lossy(&kept).trim_end().to_string()
}

fn emit_line(line: &[u8], on_line: &mut dyn FnMut(&str)) {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end();
    if !text.is_empty() {
        on_line(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_script;
    use tempfile::TempDir;

    fn argv(parts: &[&str]) -> Vec<OsString> {
        parts.iter().map(OsString::from).collect()
    }

    #[test]
    fn test_combined_output_and_status() {
        let invoker = SubprocessInvoker::default();
        let outcome = invoker.run(&argv(&["/bin/sh", "-c", "echo out; echo err >&2; exit 3"]));
        assert_eq!(outcome.status, ExitKind::Exited(3));
        assert!(outcome.output.contains("out"));
        assert!(outcome.output.contains("err"));
    }

    #[test]
    fn test_capture_is_bounded() {
        let invoker = SubprocessInvoker::new(16);
        let outcome = invoker.run(&argv(&[
            "/bin/sh",
            "-c",
            "i=0; while [ $i -lt 2000 ]; do echo 0123456789; i=$((i+1)); done",
        ]));
        assert_eq!(outcome.status, ExitKind::Exited(0));
        assert!(outcome.output.len() <= 16);
    }

    #[test]
    fn test_spawn_failure_codes() {
        let invoker = SubprocessInvoker::default();
        let missing = invoker.run(&argv(&["/nonexistent/tool", "a", "b"]));
        assert_eq!(missing.code(), Some(127));

        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("plain");
        std::fs::write(&plain, "data").unwrap();
        let denied = invoker.run(&[plain.into_os_string()]);
        assert_eq!(denied.code(), Some(126));
    }

    #[test]
    fn test_signal() {
        let invoker = SubprocessInvoker::default();
        let outcome = invoker.run(&argv(&["/bin/sh", "-c", "kill -9 $$"]));
        assert_eq!(outcome.status, ExitKind::Signaled(9));
        assert_eq!(outcome.signal(), 9);
    }

    #[test]
    fn test_streaming_lines() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "lines", "echo one\necho\necho two\n");
        let mut seen = Vec::new();
        let outcome = SubprocessInvoker::default()
            .run_streaming(&[script.into_os_string()], &mut |l| seen.push(l.to_string()));
        assert_eq!(outcome.code(), Some(0));
        assert_eq!(seen, vec!["one", "two"]);
    }

    #[test]
    fn test_unterminated_output_stays_bounded() {
        let mut longest = 0;
        let mut total = 0;
        let outcome = SubprocessInvoker::new(64).run_streaming(
            &argv(&["/bin/sh", "-c", "head -c 2000000 /dev/zero | tr '\\0' x"]),
            &mut |l| {
                longest = longest.max(l.len());
                total += l.len();
            },
        );
        assert_eq!(outcome.code(), Some(0));
        assert_eq!(outcome.output.len(), 64);
        assert!(longest <= LINE_LIMIT);
        assert_eq!(total, 2_000_000);
    }

    #[test]
    fn test_carriage_returns_split_progress() {
        let mut seen = Vec::new();
        SubprocessInvoker::default().run_streaming(
            &argv(&["/bin/sh", "-c", "printf '10%%\\r50%%\\r100%%\\n'"]),
            &mut |l| seen.push(l.to_string()),
        );
        assert_eq!(seen, vec!["10%", "50%", "100%"]);
    }
}
