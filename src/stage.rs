// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-sim :: stage  —  copy the west output to where the host looks
//
//  A previous run of the simulator may still be executing the binary we are
//  about to overwrite.  Linux refuses to open a running executable for
//  writing (ETXTBSY) but happily lets us rename a fresh copy over it, so
//  each destination is handled as:
//
//    exists?  ── remove ── ok ──────────────→ copy → chmod
//                   └──── fails ─→ copy to <dest>.tmp → chmod → rename over
//
//  A busy error anywhere in one attempt backs off and retries, up to the
//  retry policy's attempt count.  Every copy is checked against the source
//  by SHA-256 afterwards.
// ─────────────────────────────────────────────────────────────────────────────

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{Result, SimError};
use crate::variant::BuildVariant;

// ── Artifact names the host may look for ─────────────────────────────────────

pub const TEST_RUNNER_NAME: &str = "test_runner.exe";
pub const FIRMWARE_NAME:    &str = "firmware.bin";
pub const NATIVE_NAME:      &str = "zephyr.exe";
pub const PROGRAM_NAME:     &str = "program";

/// Staging destinations for `variant`; the first one is the primary artifact.
pub fn destinations(out_dir: &Path, variant: &BuildVariant) -> Vec<PathBuf> {
    let names: &[&str] = if variant.test {
        &[TEST_RUNNER_NAME, FIRMWARE_NAME]
    } else {
        &[FIRMWARE_NAME, NATIVE_NAME]
    };
    names.iter().map(|n| out_dir.join(n)).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
//  Injected effects
// ─────────────────────────────────────────────────────────────────────────────

/// Filesystem operations used while staging.
pub trait FileOps {
    fn exists(&self, path: &Path) -> bool;
    fn remove(&self, path: &Path) -> io::Result<()>;
    fn copy(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn make_executable(&self, path: &Path) -> io::Result<()>;
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFs;

impl FileOps for StdFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::copy(from, to).map(|_| ())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }

    fn make_executable(&self, path: &Path) -> io::Result<()> {
        set_executable(path)
    }
}

#[cfg(unix)]
pub fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
pub fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

pub trait Sleeper {
    fn sleep(&self, d: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, d: Duration) {
        std::thread::sleep(d);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Retry state machine
// ─────────────────────────────────────────────────────────────────────────────

/// How a destination ended up in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Removed (or absent), then copied.
    Direct,
    /// Copied beside the destination and renamed over it.
    AtomicReplace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedCopy {
    pub dest:     PathBuf,
    pub attempts: u32,
    pub route:    Route,
}

#[derive(Debug)]
enum CopyState {
    Attempting(u32),
    BackingOff(u32, io::Error),
    Succeeded(u32, Route),
    Exhausted(u32, io::Error),
}

pub struct Stager<'a> {
    fs:      &'a dyn FileOps,
    sleeper: &'a dyn Sleeper,
    policy:  RetryPolicy,
}

impl<'a> Stager<'a> {
    pub fn new(fs: &'a dyn FileOps, sleeper: &'a dyn Sleeper, policy: RetryPolicy) -> Self {
        Self { fs, sleeper, policy }
    }

    /// Copy `source` to every destination, then verify each copy.
    pub fn stage(&self, source: &Path, dests: &[PathBuf]) -> Result<Vec<StagedCopy>> {
        let mut staged = Vec::with_capacity(dests.len());
        for dest in dests {
            staged.push(self.copy_one(source, dest)?);
        }

        let expected = hash_file(source)?;
        for copy in &staged {
            if hash_file(&copy.dest)? != expected {
                return Err(SimError::DigestMismatch(copy.dest.display().to_string()));
            }
        }
        Ok(staged)
    }

    pub fn copy_one(&self, source: &Path, dest: &Path) -> Result<StagedCopy> {
        let max = self.policy.attempts.max(1);
        let mut state = CopyState::Attempting(1);

        loop {
            state = match state {
                CopyState::Attempting(n) => match self.attempt(source, dest) {
                    Ok(route) => CopyState::Succeeded(n, route),
                    Err(e) if is_busy(&e) && n < max => CopyState::BackingOff(n, e),
                    Err(e) => CopyState::Exhausted(n, e),
                },
                CopyState::BackingOff(n, e) => {
                    warn!(dest = %dest.display(), attempt = n, max, error = %e, "file busy, retrying");
                    self.sleeper.sleep(self.policy.delay());
                    CopyState::Attempting(n + 1)
                }
                CopyState::Succeeded(attempts, route) => {
                    debug!(dest = %dest.display(), attempts, ?route, "staged");
                    return Ok(StagedCopy { dest: dest.to_path_buf(), attempts, route });
                }
                CopyState::Exhausted(attempts, err) => {
                    return Err(SimError::StageFailed {
                        dest: dest.display().to_string(),
                        attempts,
                        source: err,
                    });
                }
            };
        }
    }

    fn attempt(&self, source: &Path, dest: &Path) -> io::Result<Route> {
        if self.fs.exists(dest) {
            if let Err(e) = self.fs.remove(dest) {
                debug!(dest = %dest.display(), error = %e, "remove failed, replacing atomically");
                let tmp = tmp_path(dest);
                let replaced = self.fs.copy(source, &tmp)
                    .and_then(|_| self.fs.make_executable(&tmp))
                    .and_then(|_| self.fs.rename(&tmp, dest));
                if replaced.is_err() && self.fs.exists(&tmp) {
                    if let Err(e) = self.fs.remove(&tmp) {
                        warn!(tmp = %tmp.display(), error = %e, "could not clean up temporary copy");
                    }
                }
                return replaced.map(|_| Route::AtomicReplace);
            }
        }

        self.fs.copy(source, dest)?;
        self.fs.make_executable(dest)?;
        Ok(Route::Direct)
    }
}

fn tmp_path(dest: &Path) -> PathBuf {
    let mut s = dest.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

/// "Resource busy" class errors: the target is held by a running process.
pub fn is_busy(e: &io::Error) -> bool {
    #[cfg(unix)]
    const BUSY_CODES: &[i32] = &[16 /* EBUSY */, 26 /* ETXTBSY */];
    #[cfg(windows)]
    const BUSY_CODES: &[i32] = &[32 /* ERROR_SHARING_VIOLATION */, 33 /* ERROR_LOCK_VIOLATION */];
    #[cfg(not(any(unix, windows)))]
    const BUSY_CODES: &[i32] = &[];

    if e.raw_os_error().is_some_and(|code| BUSY_CODES.contains(&code)) {
        return true;
    }
    let msg = e.to_string().to_lowercase();
    msg.contains("text file busy") || msg.contains("resource busy")
}

/// SHA-256 of the file content, hex-encoded.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let data = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&data)))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::{Cell, RefCell};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn busy() -> io::Error {
        io::Error::from_raw_os_error(26)
    }

    /// Real filesystem with scripted busy failures.  Removal and rename
    /// failures only hit `locked`; copy failures hit every path.
    #[derive(Default)]
    struct FlakyFs {
        locked:      PathBuf,
        remove_busy: Cell<u32>,
        rename_busy: Cell<u32>,
        copy_busy:   Cell<u32>,
        copy_calls:  Cell<u32>,
    }

    fn take(counter: &Cell<u32>) -> bool {
        let left = counter.get();
        if left > 0 {
            counter.set(left - 1);
            true
        } else {
            false
        }
    }

    impl FileOps for FlakyFs {
        fn exists(&self, path: &Path) -> bool {
            StdFs.exists(path)
        }
        fn remove(&self, path: &Path) -> io::Result<()> {
            if path == self.locked && take(&self.remove_busy) { return Err(busy()); }
            StdFs.remove(path)
        }
        fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
            self.copy_calls.set(self.copy_calls.get() + 1);
            if take(&self.copy_busy) { return Err(busy()); }
            StdFs.copy(from, to)
        }
        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            if to == self.locked && take(&self.rename_busy) { return Err(busy()); }
            StdFs.rename(from, to)
        }
        fn make_executable(&self, path: &Path) -> io::Result<()> {
            StdFs.make_executable(path)
        }
    }

    #[derive(Default)]
    struct RecordingSleeper(RefCell<Vec<Duration>>);

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, d: Duration) {
            self.0.borrow_mut().push(d);
        }
    }

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("zephyr.exe");
        fs::write(&src, b"\x7fELF fake simulator image").unwrap();
        (tmp, src)
    }

    fn mode(p: &Path) -> u32 {
        fs::metadata(p).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn copies_are_identical_and_executable() {
        let (tmp, src) = fixture();
        let dests = destinations(tmp.path(), &BuildVariant { test: true, debug: false });
        fs::write(&dests[1], b"stale").unwrap();

        let sleeper = RecordingSleeper::default();
        let staged = Stager::new(&StdFs, &sleeper, RetryPolicy::default()).stage(&src, &dests).unwrap();

        assert_eq!(staged.len(), 2);
        for d in &dests {
            assert_eq!(fs::read(d).unwrap(), fs::read(&src).unwrap());
            assert_eq!(mode(d), 0o755);
        }
        assert!(sleeper.0.borrow().is_empty());
    }

    #[test]
    fn locked_destination_is_replaced_atomically() {
        let (tmp, src) = fixture();
        let dest = tmp.path().join(FIRMWARE_NAME);
        fs::write(&dest, b"old").unwrap();

        let flaky = FlakyFs { locked: dest.clone(), remove_busy: Cell::new(1), ..Default::default() };
        let copy = Stager::new(&flaky, &RecordingSleeper::default(), RetryPolicy::default())
            .copy_one(&src, &dest)
            .unwrap();

        assert_eq!(copy.route, Route::AtomicReplace);
        assert_eq!(copy.attempts, 1);
        assert_eq!(fs::read(&dest).unwrap(), fs::read(&src).unwrap());
        assert!(!tmp_path(&dest).exists());
    }

    #[test]
    fn busy_twice_then_success() {
        let (tmp, src) = fixture();
        let dest = tmp.path().join(FIRMWARE_NAME);
        fs::write(&dest, b"old").unwrap();

        // The running binary blocks both removal and the rename over it
        // for two attempts.
        let flaky = FlakyFs {
            locked:      dest.clone(),
            remove_busy: Cell::new(2),
            rename_busy: Cell::new(2),
            ..Default::default()
        };
        let sleeper = RecordingSleeper::default();
        let staged = Stager::new(&flaky, &sleeper, RetryPolicy::default())
            .stage(&src, &[dest.clone()])
            .unwrap();

        assert_eq!(staged[0].attempts, 3);
        assert_eq!(staged[0].route, Route::Direct);
        assert_eq!(flaky.remove_busy.get(), 0);
        assert_eq!(flaky.rename_busy.get(), 0);
        assert_eq!(fs::read(&dest).unwrap(), fs::read(&src).unwrap());
        assert_eq!(mode(&dest), 0o755);
        assert!(!tmp_path(&dest).exists());
        assert_eq!(sleeper.0.borrow().as_slice(), &[Duration::from_millis(500); 2]);
    }

    #[test]
    fn persistent_busy_makes_exactly_three_attempts() {
        let (tmp, src) = fixture();
        let dest = tmp.path().join(TEST_RUNNER_NAME);

        let flaky = FlakyFs { copy_busy: Cell::new(u32::MAX), ..Default::default() };
        let sleeper = RecordingSleeper::default();
        let err = Stager::new(&flaky, &sleeper, RetryPolicy::default())
            .copy_one(&src, &dest)
            .unwrap_err();

        assert!(matches!(err, SimError::StageFailed { attempts: 3, .. }));
        assert_eq!(flaky.copy_calls.get(), 3);
        assert_eq!(sleeper.0.borrow().len(), 2);
    }

    #[test]
    fn non_busy_errors_do_not_retry() {
        let (tmp, _src) = fixture();
        let missing = tmp.path().join("nope.exe");
        let sleeper = RecordingSleeper::default();
        let err = Stager::new(&StdFs, &sleeper, RetryPolicy::default())
            .copy_one(&missing, &tmp.path().join(FIRMWARE_NAME))
            .unwrap_err();

        assert!(matches!(err, SimError::StageFailed { attempts: 1, .. }));
        assert!(sleeper.0.borrow().is_empty());
    }

    #[test]
    fn busy_classification() {
        assert!(is_busy(&busy()));
        assert!(is_busy(&io::Error::from_raw_os_error(16)));
        assert!(!is_busy(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(is_busy(&io::Error::new(io::ErrorKind::Other, "Text file busy (os error 26)")));
    }

    #[test]
    fn destinations_per_variant() {
        let out = Path::new("/b");
        assert_eq!(
            destinations(out, &BuildVariant::default()),
            vec![out.join("firmware.bin"), out.join("zephyr.exe")]
        );
        assert_eq!(
            destinations(out, &BuildVariant { test: true, debug: true }),
            vec![out.join("test_runner.exe"), out.join("firmware.bin")]
        );
    }
}
