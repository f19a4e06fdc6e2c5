/*!
 * Append-Only File (AOF) Persistence
 *
 * Every mutating command that succeeded is appended here in its original
 * request form, using the normal wire encoding. On startup the file is
 * decoded record by record and each record is re-executed against an empty
 * store, which rebuilds the state the log describes. A damaged tail is cut
 * off before the first new append so later records never sit behind bytes
 * that replay cannot get past.
 *
 * Appends are serialized by one mutex held only for write + flush (+ fsync
 * under `FsyncPolicy::Always`). A failed append latches the log into a
 * failed state; from then on every append is refused so no write is ever
 * acknowledged without being recorded.
 */

use crate::command::Dispatcher;
use crate::config::FsyncPolicy;
use crate::protocol::{DecodeError, Decoder, Value};
use crate::store::Store;
use crossbeam::channel::{bounded, select, tick, Sender};
use log::{error, info, warn};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

const REPLAY_BUF: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum AofError {
    #[error("cannot open append-only file {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("append-only file write failed: {0}")]
    Write(#[source] io::Error),
    /// An earlier append failed; the log accepts nothing further
    #[error("append-only file is in a failed state")]
    Failed,
}

/// Handle to the process-wide append-only file
pub struct Aof {
    path: PathBuf,
    file: Mutex<File>,
    policy: FsyncPolicy,
    failed: Arc<AtomicBool>,
    // Dropped last: stops and joins the background fsync thread
    _syncer: Option<Syncer>,
}

impl Aof {
    /// Open (creating if absent) the log at `path` for appending
    pub fn open(path: impl AsRef<Path>, policy: FsyncPolicy) -> Result<Self, AofError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AofError::Open { path: path.clone(), source })?;
        Self::from_file(path, file, policy)
    }

    pub(crate) fn from_file(
        path: PathBuf,
        file: File,
        policy: FsyncPolicy,
    ) -> Result<Self, AofError> {
        let failed = Arc::new(AtomicBool::new(false));
        let syncer = match policy {
            FsyncPolicy::EverySec => {
                let handle = file
                    .try_clone()
                    .map_err(|source| AofError::Open { path: path.clone(), source })?;
                Some(
                    Syncer::spawn(handle, failed.clone())
                        .map_err(|source| AofError::Open { path: path.clone(), source })?,
                )
            }
            FsyncPolicy::Always | FsyncPolicy::No => None,
        };
        info!("append-only file {} opened (fsync: {:?})", path.display(), policy);
        Ok(Self {
            path,
            file: Mutex::new(file),
            policy,
            failed,
            _syncer: syncer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether an earlier write failure has disabled the log
    #[inline]
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Append one record
    ///
    /// The value is encoded before the lock is taken; only the write itself
    /// is serialized. On I/O failure the log is latched failed and the error
    /// returned; the caller must not acknowledge the write.
    pub fn append(&self, record: &Value) -> Result<(), AofError> {
        if self.is_failed() {
            return Err(AofError::Failed);
        }
        let bytes = record.encode();

        let mut file = self.file.lock();
        let res = file.write_all(&bytes).and_then(|_| file.flush()).and_then(|_| {
            if self.policy == FsyncPolicy::Always {
                file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = res {
            self.failed.store(true, Ordering::Release);
            error!("append-only file write failed, refusing further writes: {}", e);
            return Err(AofError::Write(e));
        }
        Ok(())
    }

    /// Cut the file back to its first `len` bytes
    ///
    /// Used to drop an unreadable tail found by replay. Appends continue from
    /// the new end.
    pub fn truncate(&self, len: u64) -> Result<(), AofError> {
        let file = self.file.lock();
        file.set_len(len)
            .and_then(|_| file.sync_data())
            .map_err(|e| {
                self.failed.store(true, Ordering::Release);
                AofError::Write(e)
            })
    }

    /// Force everything appended so far to stable storage
    pub fn sync(&self) -> Result<(), AofError> {
        let file = self.file.lock();
        file.sync_data().map_err(|e| {
            self.failed.store(true, Ordering::Release);
            AofError::Write(e)
        })
    }
}

/// Background fsync thread for `FsyncPolicy::EverySec`
struct Syncer {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Syncer {
    fn spawn(file: File, failed: Arc<AtomicBool>) -> io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let handle = std::thread::Builder::new()
            .name("aof-fsync".into())
            .spawn(move || {
                let ticker = tick(Duration::from_secs(1));
                loop {
                    let stopping = select! {
                        recv(ticker) -> _ => false,
                        // sender dropped: shutting down
                        recv(stop_rx) -> _ => true,
                    };
                    if stopping {
                        break;
                    }
                    if let Err(e) = file.sync_data() {
                        error!("append-only file fsync failed, refusing further writes: {}", e);
                        failed.store(true, Ordering::Release);
                    }
                }
                let _ = file.sync_data();
            })?;
        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }
}

impl Drop for Syncer {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Outcome of replaying a log
#[derive(Debug, Default)]
pub struct ReplayReport {
    /// Records that executed successfully
    pub applied: usize,
    /// Records whose execution produced an error reply (skipped)
    pub rejected: usize,
    /// Decode failure that ended replay early, if any
    pub error: Option<DecodeError>,
    /// Length in bytes of the prefix made of complete records
    pub valid_len: u64,
}

impl ReplayReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// `BufRead` adapter that counts the bytes handed to its consumer
struct Counting<R> {
    inner: R,
    consumed: u64,
}

impl<R: BufRead> Read for Counting<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = {
            let avail = self.fill_buf()?;
            let n = avail.len().min(buf.len());
            buf[..n].copy_from_slice(&avail[..n]);
            n
        };
        self.consume(n);
        Ok(n)
    }
}

impl<R: BufRead> BufRead for Counting<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.consumed += amt as u64;
        self.inner.consume(amt);
    }
}

/// Re-execute every record from `records` against `store`
///
/// Runs through a dispatcher with no log attached so replayed records are
/// not appended again. Stops at the end of input, or at the first record
/// that fails to decode; whatever was applied before that point stays.
pub fn replay(store: Arc<Store>, records: impl BufRead) -> ReplayReport {
    let dispatcher = Dispatcher::new(store, None);
    let mut decoder = Decoder::new(Counting {
        inner: records,
        consumed: 0,
    });
    let mut report = ReplayReport::default();

    loop {
        match decoder.decode() {
            Ok(record) => {
                report.valid_len = decoder.get_mut().consumed;
                if dispatcher.handle(&record).is_error() {
                    warn!(
                        "skipping append-only record {} that failed to replay",
                        report.applied + report.rejected + 1
                    );
                    report.rejected += 1;
                } else {
                    report.applied += 1;
                }
            }
            Err(DecodeError::EndOfInput) => break,
            Err(e) => {
                warn!(
                    "append-only file replay stopped after {} records: {}",
                    report.applied + report.rejected,
                    e
                );
                report.error = Some(e);
                break;
            }
        }
    }
    report
}

/// Replay the log file at `path`; a missing file is an empty log
pub fn replay_file(path: impl AsRef<Path>, store: Arc<Store>) -> Result<ReplayReport, AofError> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ReplayReport::default()),
        Err(source) => {
            return Err(AofError::Open {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let report = replay(store, BufReader::with_capacity(REPLAY_BUF, file));
    info!(
        "replayed {} records from {} ({} rejected)",
        report.applied,
        path.display(),
        report.rejected
    );
    Ok(report)
}

/// Rebuild `store` from the log at `path` and open the log for appending
///
/// When replay stops on an unreadable tail, the file is truncated to the
/// records that were applied before anything new is appended.
pub fn restore(
    path: impl AsRef<Path>,
    policy: FsyncPolicy,
    store: Arc<Store>,
) -> Result<(Aof, ReplayReport), AofError> {
    let path = path.as_ref();
    let report = replay_file(path, store)?;
    let aof = Aof::open(path, policy)?;
    if let Some(e) = &report.error {
        warn!(
            "append-only file {} has an unreadable tail ({}); truncating to {} bytes",
            path.display(),
            e,
            report.valid_len
        );
        aof.truncate(report.valid_len)?;
    }
    Ok((aof, report))
}
