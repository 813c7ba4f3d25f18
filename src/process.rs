// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-sim :: process  —  blocking subprocess with a wall-clock limit
//
//  stdout / stderr are read on helper threads and streamed back in chunks,
//  so a chatty child cannot fill its pipe and stall.  The reader threads are
//  never joined: grandchildren (west spawns cmake, ninja, …) may keep the
//  pipes open after the child itself is gone.
//
//    child running, deadline not reached   →  keep collecting
//    deadline reached                      →  kill, report timed_out
//    child exited                          →  collect until EOF, at most
//                                             DRAIN_GRACE and never past
//                                             the deadline, then detach
// ─────────────────────────────────────────────────────────────────────────────

use std::io::{ErrorKind, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long to keep reading after the child exited while something else
/// still holds its output pipes.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Outcome of a finished (or abandoned) subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; signals map to 128 + signo, timeouts to -1.
    pub exit_code: i32,
    pub stdout:    String,
    pub stderr:    String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

type Chunk = (Stream, Vec<u8>);

#[derive(Default)]
struct Collected {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Collected {
    fn push(&mut self, (stream, bytes): Chunk) {
        match stream {
            Stream::Stdout => self.stdout.extend(bytes),
            Stream::Stderr => self.stderr.extend(bytes),
        }
    }

    /// Wait up to `wait` for output.  Returns false once every reader is done.
    fn pump(&mut self, rx: &Receiver<Chunk>, wait: Duration) -> bool {
        match rx.recv_timeout(wait) {
            Ok(chunk) => {
                self.push(chunk);
                while let Ok(chunk) = rx.try_recv() {
                    self.push(chunk);
                }
                true
            }
            Err(RecvTimeoutError::Timeout)      => true,
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn finish(self, exit_code: i32, timed_out: bool) -> ProcessOutput {
        ProcessOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            timed_out,
        }
    }
}

/// Spawn `cmd` with piped output and return within `timeout`.
///
/// Only spawn/wait failures are errors; a non-zero exit or a timeout is
/// reported in the returned value.
pub fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> std::io::Result<ProcessOutput> {
    debug!(?cmd, timeout_secs = timeout.as_secs_f64(), "spawning");

    let deadline = Instant::now() + timeout;
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let (tx, rx) = mpsc::channel();
    if let Some(out) = child.stdout.take() {
        drain(out, Stream::Stdout, tx.clone());
    }
    if let Some(err) = child.stderr.take() {
        drain(err, Stream::Stderr, tx.clone());
    }
    drop(tx);

    let mut collected = Collected::default();
    let mut readers_open = true;

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        let now = Instant::now();
        if now >= deadline {
            warn!(timeout_secs = timeout.as_secs(), "child timed out, killing");
            let _ = child.kill();
            let _ = child.wait();
            return Ok(collected.finish(-1, true));
        }
        let wait = POLL_INTERVAL.min(deadline - now);
        if readers_open {
            readers_open = collected.pump(&rx, wait);
        } else {
            thread::sleep(wait);
        }
    };

    let grace_end = (Instant::now() + DRAIN_GRACE).min(deadline);
    while readers_open {
        let now = Instant::now();
        if now >= grace_end {
            warn!("output pipes still held open after exit, detaching readers");
            break;
        }
        readers_open = collected.pump(&rx, grace_end - now);
    }

    Ok(collected.finish(exit_code(status), false))
}

fn drain<R: Read + Send + 'static>(mut reader: R, stream: Stream, tx: Sender<Chunk>) {
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send((stream, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt as _;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    1
}
