//! Child process supervision with a hard deadline.

use crate::error::{Error, Result};
use crate::types::CommandOutput;
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Spawn `cmd`, feed `stdin`, and collect its output.
///
/// The child runs in its own process group. Once `timeout` elapses the
/// whole group is killed and [`Error::Timeout`] is returned with `label`
/// as the command text. The deadline also covers draining the output
/// pipes, which a backgrounded grandchild may hold open after the shell
/// itself has exited.
pub(crate) fn run_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    label: &str,
) -> Result<CommandOutput> {
    let program = cmd.get_program().to_string_lossy().to_string();

    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().map_err(|source| Error::Spawn {
        program: program.clone(),
        source,
    })?;

    if let (Some(bytes), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let data = bytes.to_vec();
        // Detached: a reader that never drains stdin must not stall us.
        thread::spawn(move || {
            // A child that exits early closes the pipe; that is not our error to report.
            let _ = pipe.write_all(&data);
        });
    }

    let (tx, rx) = mpsc::channel();
    spawn_reader(Stream::Stdout, child.stdout.take(), tx.clone());
    spawn_reader(Stream::Stderr, child.stderr.take(), tx);

    let deadline = Instant::now() + timeout;
    let timed_out = |child: &mut Child| {
        log::debug!("Killing {} after {:?}: {}", program, timeout, label);
        kill_group(child);
        Error::Timeout {
            command: label.to_string(),
            timeout,
        }
    };

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(timed_out(&mut child));
        }

        thread::sleep(POLL_INTERVAL.min(deadline - now));
    };

    let mut stdout = None;
    let mut stderr = None;
    while stdout.is_none() || stderr.is_none() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((Stream::Stdout, buf)) => stdout = Some(buf),
            Ok((Stream::Stderr, buf)) => stderr = Some(buf),
            Err(RecvTimeoutError::Timeout) => return Err(timed_out(&mut child)),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(CommandOutput {
        stdout: stdout.unwrap_or_default(),
        stderr: stderr.unwrap_or_default(),
        exit_code: status.code(),
    })
}

/// Kill the child's process group, then the child itself.
fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
        // Negative pid signals every member of the group
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_reader<R>(stream: Stream, pipe: Option<R>, done: Sender<(Stream, Vec<u8>)>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = done.send((stream, buf));
    });
}
