//! Tee execution: run a shell command and copy its combined output, as it
//! arrives, to both the console and a log file.
//!
//! stdout and stderr of the child share a single pipe, so the log holds one
//! interleaved stream in the order the child produced it. Each chunk read from
//! the pipe reaches every sink before the next read, which keeps memory flat
//! no matter how much the command prints.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::ShellConfig;

const CHUNK_SIZE: usize = 8 * 1024;

/// A writer that forwards every write to all of its sinks, in order.
pub struct FanOut<W> {
    sinks: Vec<W>,
}

impl<W: Write> FanOut<W> {
    pub fn new(sinks: Vec<W>) -> Self {
        Self { sinks }
    }

    pub fn into_inner(self) -> Vec<W> {
        self.sinks
    }
}

impl<W: Write> Write for FanOut<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for sink in &mut self.sinks {
            sink.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for sink in &mut self.sinks {
            sink.flush()?;
        }
        Ok(())
    }
}

/// Console sink. A broken terminal must not stop capture into the log, so the
/// first failure is reported and every later write is dropped.
struct Console<W> {
    inner: W,
    broken: bool,
}

impl<W: Write> Console<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            broken: false,
        }
    }

    fn check(&mut self, result: io::Result<()>) {
        if let Err(e) = result {
            warn!(error = %e, "console output failed; still capturing to log");
            self.broken = true;
        }
    }
}

impl<W: Write> Write for Console<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.broken {
            let result = self.inner.write_all(buf);
            self.check(result);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.broken {
            let result = self.inner.flush();
            self.check(result);
        }
        Ok(())
    }
}

/// What a tee run observed about the child.
#[derive(Debug, Clone)]
pub struct TeeOutcome {
    pub exit_code: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub bytes_captured: u64,
}

/// Run `command` through the configured shell, teeing its output into `log_path`.
///
/// The log's directory is created if missing and the log itself is truncated.
/// The child's exit status is returned as-is; see [`exit_code_of`].
pub fn run_tee(shell: &ShellConfig, command: &str, log_path: &Path) -> Result<TeeOutcome> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!("failed to create output directory: {}", parent.display())
        })?;
    }
    let log = File::create(log_path)
        .with_context(|| format!("failed to open log file: {}", log_path.display()))?;

    let (mut reader, writer) = io::pipe().context("failed to create output pipe")?;

    info!(
        shell = %shell.program,
        log = %log_path.display(),
        "spawning command"
    );
    let started_at = Utc::now();
    // `cmd` holds copies of the write end; it has to be dropped before the
    // read loop or EOF never arrives.
    let mut child = {
        let mut cmd = Command::new(&shell.program);
        cmd.args(&shell.args)
            .arg(command)
            .stdin(Stdio::inherit())
            .stdout(
                writer
                    .try_clone()
                    .context("failed to duplicate output pipe")?,
            )
            .stderr(writer);
        cmd.spawn()
            .with_context(|| format!("failed to spawn shell: {}", shell.program))?
    };

    let console: Box<dyn Write> = Box::new(Console::new(io::stdout()));
    let mut sinks = FanOut::new(vec![console, Box::new(log)]);
    let mut buf = [0u8; CHUNK_SIZE];
    let mut bytes_captured = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("failed to read command output"),
        };
        sinks
            .write_all(&buf[..n])
            .and_then(|()| sinks.flush())
            .with_context(|| format!("failed to write log file: {}", log_path.display()))?;
        bytes_captured += n as u64;
    }

    let status = child.wait().context("failed to wait for command")?;
    let finished_at = Utc::now();
    let exit_code = exit_code_of(status);

    debug!(
        exit_code,
        bytes = bytes_captured,
        elapsed_ms = (finished_at - started_at).num_milliseconds(),
        "command finished"
    );

    Ok(TeeOutcome {
        exit_code,
        started_at,
        finished_at,
        bytes_captured,
    })
}

/// Map an exit status to an integer: the exit code when there is one,
/// otherwise `128 + signal` as POSIX shells report it.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    warn!(?status, "exit status has neither a code nor a signal");
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sh() -> ShellConfig {
        ShellConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string()],
        }
    }

    #[test]
    fn fan_out_writes_every_sink() {
        let mut fan = FanOut::new(vec![Vec::new(), Vec::new()]);
        fan.write_all(b"hello ").unwrap();
        fan.write_all(b"world").unwrap();
        fan.flush().unwrap();

        for sink in fan.into_inner() {
            assert_eq!(sink, b"hello world");
        }
    }

    #[test]
    fn fan_out_stops_on_sink_error() {
        struct Failing;
        impl Write for Failing {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::other("sink gone"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let sink: Box<dyn Write> = Box::new(Failing);
        let mut fan = FanOut::new(vec![sink]);
        assert!(fan.write_all(b"x").is_err());
    }

    #[test]
    fn console_swallows_errors_after_first_failure() {
        struct Failing(u32);
        impl Write for Failing {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                self.0 += 1;
                Err(io::Error::from(io::ErrorKind::BrokenPipe))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut console = Console::new(Failing(0));
        console.write_all(b"one").unwrap();
        console.write_all(b"two").unwrap();
        assert!(console.broken);
        assert_eq!(console.inner.0, 1);
    }

    proptest! {
        #[test]
        fn fan_out_sinks_see_concatenation(chunks in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..64), 0..16)
        ) {
            let mut fan = FanOut::new(vec![Vec::new(), Vec::new(), Vec::new()]);
            for chunk in &chunks {
                fan.write_all(chunk).unwrap();
            }
            let expected: Vec<u8> = chunks.concat();
            for sink in fan.into_inner() {
                prop_assert_eq!(&sink, &expected);
            }
        }
    }

    #[test]
    fn captures_interleaved_stdout_and_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("step.log");

        let outcome = run_tee(
            &sh(),
            "printf 'out1\\n'; printf 'err1\\n' >&2; printf 'out2\\n'",
            &log,
        )
        .unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "out1\nerr1\nout2\n");
        assert_eq!(outcome.bytes_captured, 15);
    }

    #[test]
    fn propagates_exit_code() {
        let tmp = tempfile::tempdir().unwrap();
        let outcome = run_tee(&sh(), "exit 7", &tmp.path().join("step.log")).unwrap();
        assert_eq!(outcome.exit_code, 7);
        assert!(outcome.started_at <= outcome.finished_at);
    }

    #[cfg(unix)]
    #[test]
    fn signal_termination_uses_shell_encoding() {
        let tmp = tempfile::tempdir().unwrap();
        let outcome = run_tee(&sh(), "kill -TERM $$", &tmp.path().join("step.log")).unwrap();
        assert_eq!(outcome.exit_code, 128 + 15);
    }

    #[test]
    fn creates_missing_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("deep").join("nested").join("step.log");

        run_tee(&sh(), "echo hi", &log).unwrap();
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "hi\n");
    }

    #[test]
    fn truncates_existing_log() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("step.log");
        std::fs::write(&log, "stale output from an earlier run\n").unwrap();

        run_tee(&sh(), "echo fresh", &log).unwrap();
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "fresh\n");
    }

    #[test]
    fn preserves_raw_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("step.log");

        run_tee(&sh(), "printf '\\377\\r\\n'", &log).unwrap();
        assert_eq!(std::fs::read(&log).unwrap(), vec![0xff, b'\r', b'\n']);
    }

    #[test]
    fn large_output_is_fully_captured() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("step.log");

        let outcome = run_tee(&sh(), "head -c 200000 /dev/zero", &log).unwrap();
        assert_eq!(outcome.bytes_captured, 200_000);
        assert_eq!(std::fs::metadata(&log).unwrap().len(), 200_000);
    }

    #[test]
    fn unwritable_directory_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        let err = run_tee(&sh(), "true", &blocker.join("step.log")).unwrap_err();
        assert!(err.to_string().contains("failed to create output directory"));
    }

    #[cfg(unix)]
    #[test]
    fn exit_code_of_raw_statuses() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(exit_code_of(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code_of(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code_of(ExitStatus::from_raw(9)), 137);
    }
}
