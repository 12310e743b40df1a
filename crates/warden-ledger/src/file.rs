//! `FileLedger`: the durable `LedgerBackend`.
//!
//! Layout inside the ledger directory:
//!
//! - `ledger.jsonl`: optional snapshot line, then one record per envelope
//! - `ledger.lock`: lock marker, present only while a writer appends
//! - `ledger.reclaim`: `flock` target serializing stale-lock reclaim
//!
//! Appends are one `write_all` of a complete line on an `O_APPEND` handle
//! followed by `sync_data`. A line without its trailing newline can only be
//! the remains of a crashed append; it is discarded on recovery and skipped
//! by readers. A complete line that does not parse is never discarded: it
//! breaks the chain.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
    thread,
};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use warden_contracts::{
    envelope::{ChainAnchor, ChainVerification, DecisionEnvelope, GENESIS_HASH},
    error::{WardenError, WardenResult},
};
use warden_core::traits::{EnvelopeIter, LedgerBackend, SnapshotInfo};
use warden_proof::{
    chain::{broken_result, ChainVerifier},
    SigningKey,
};

use crate::{
    lock::{io_error, LedgerLock},
    options::LedgerOptions,
    record::{LedgerLine, SnapshotRecord},
};

pub const LEDGER_FILE: &str = "ledger.jsonl";
pub const LOCK_FILE: &str = "ledger.lock";

/// What `FileLedger::open` found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryReport {
    /// Envelope records retained after recovery.
    pub records: u64,
    /// Bytes of incomplete trailing data that were truncated away.
    pub discarded_bytes: u64,
    pub snapshot: Option<ChainAnchor>,
    pub verification: ChainVerification,
}

/// Position of the writer in the file and in the chain.
#[derive(Debug, Clone)]
struct WriterState {
    /// Length of the file up to the last complete line.
    len: u64,
    records: u64,
    snapshot: Option<SnapshotRecord>,
    next_sequence: u64,
    head_hash: String,
    verification: ChainVerification,
}

pub struct FileLedger {
    dir: PathBuf,
    path: PathBuf,
    lock_path: PathBuf,
    key: SigningKey,
    options: LedgerOptions,
    holder: Uuid,
    state: Mutex<WriterState>,
}

impl std::fmt::Debug for FileLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLedger")
            .field("path", &self.path)
            .field("holder", &self.holder)
            .finish_non_exhaustive()
    }
}

impl FileLedger {
    /// Open (or create) the ledger in `dir` and recover it.
    ///
    /// An incomplete trailing record is truncated away with a warning. A
    /// broken chain does not fail the open; it is reported in the
    /// `RecoveryReport` and every later append is refused.
    pub fn open(
        dir: impl AsRef<Path>,
        key: SigningKey,
        options: LedgerOptions,
    ) -> WardenResult<(Self, RecoveryReport)> {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| io_error("create ledger directory", &dir, e))?;

        let ledger = Self {
            path: dir.join(LEDGER_FILE),
            lock_path: dir.join(LOCK_FILE),
            dir,
            key,
            options,
            holder: Uuid::new_v4(),
            state: Mutex::new(WriterState {
                len: 0,
                records: 0,
                snapshot: None,
                next_sequence: 0,
                head_hash: GENESIS_HASH.to_string(),
                verification: ChainVerification::intact(0, GENESIS_HASH),
            }),
        };

        let _lock = ledger.lock_file()?;
        let scan = scan(&ledger.path, &ledger.key)?;
        if scan.discarded_bytes > 0 {
            truncate_to(&ledger.path, scan.state.len)?;
        }

        let report = RecoveryReport {
            records: scan.state.records,
            discarded_bytes: scan.discarded_bytes,
            snapshot: scan.state.snapshot.as_ref().map(SnapshotRecord::anchor),
            verification: scan.state.verification.clone(),
        };
        if report.verification.valid {
            info!(
                path = %ledger.path.display(),
                records = report.records,
                discarded_bytes = report.discarded_bytes,
                next_sequence = scan.state.next_sequence,
                "ledger recovered"
            );
        } else {
            error!(
                path = %ledger.path.display(),
                broken_at = ?report.verification.broken_at_sequence,
                reason = ?report.verification.reason,
                "ledger chain is broken; appends will be refused"
            );
        }

        *ledger.lock_state() = scan.state;
        Ok((ledger, report))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn next_sequence(&self) -> u64 {
        self.lock_state().next_sequence
    }

    pub fn head_hash(&self) -> String {
        self.lock_state().head_hash.clone()
    }

    /// Re-read the whole file and verify every record from the snapshot.
    pub fn verify(&self) -> WardenResult<ChainVerification> {
        Ok(scan(&self.path, &self.key)?.state.verification)
    }

    // ── Writing ──────────────────────────────────────────────────────────

    fn lock_file(&self) -> WardenResult<LedgerLock> {
        LedgerLock::acquire(&self.lock_path, self.holder, &self.options)
    }

    fn lock_state(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring `state` up to date if another writer appended since we last
    /// looked. Must be called with the file lock held.
    fn refresh(&self, state: &mut WriterState) -> WardenResult<()> {
        let on_disk = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(io_error("stat ledger", &self.path, e)),
        };
        if on_disk == state.len {
            return Ok(());
        }

        debug!(known = state.len, on_disk, "ledger changed on disk; rescanning");
        let scan = scan(&self.path, &self.key)?;
        if scan.discarded_bytes > 0 {
            truncate_to(&self.path, scan.state.len)?;
        }
        *state = scan.state;
        Ok(())
    }

    /// Append `line`, rolling back and retrying on failure.
    fn append_line(&self, state: &mut WriterState, line: &[u8]) -> WardenResult<()> {
        let retry = self.options.write_retry;
        let mut last_error = String::new();

        for attempt in 1..=retry.attempts {
            match append_once(&self.path, line) {
                Ok(()) => {
                    state.len += line.len() as u64;
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "ledger append failed; rolling back");
                    if let Err(rollback) = truncate_to(&self.path, state.len) {
                        warn!(error = %rollback, "ledger rollback failed");
                    }
                    last_error = e.to_string();
                    if attempt < retry.attempts {
                        thread::sleep(retry.backoff(attempt));
                    }
                }
            }
        }

        Err(WardenError::WriteFailed {
            attempts: retry.attempts,
            reason: last_error,
        })
    }
}

impl LedgerBackend for FileLedger {
    fn log_event(&self, envelope: &DecisionEnvelope) -> WardenResult<()> {
        let mut state = self.lock_state();
        let _lock = self.lock_file()?;
        self.refresh(&mut state)?;

        if !state.verification.valid {
            return Err(WardenError::IntegrityViolation {
                sequence: state.verification.broken_at_sequence.unwrap_or_default(),
                reason: "ledger chain is broken; append refused".to_string(),
            });
        }
        if envelope.sequence != state.next_sequence {
            return Err(WardenError::SequenceMismatch {
                expected: state.next_sequence,
                found: envelope.sequence,
            });
        }
        ChainVerifier::resume(&self.key, state.next_sequence, &state.head_hash).check(envelope)?;

        let line = LedgerLine::Record(envelope.clone()).to_line()?;
        self.append_line(&mut state, &line)?;

        state.records += 1;
        state.next_sequence += 1;
        state.head_hash.clone_from(&envelope.hash);
        state.verification = ChainVerification::intact(state.records, state.head_hash.clone());
        debug!(sequence = envelope.sequence, bytes = line.len(), "envelope appended");
        Ok(())
    }

    fn read_all(&self) -> WardenResult<EnvelopeIter<'_>> {
        match File::open(&self.path) {
            Ok(file) => Ok(Box::new(RecordIter::new(file))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Box::new(std::iter::empty())),
            Err(e) => Err(io_error("open ledger", &self.path, e)),
        }
    }

    fn snapshot(&self) -> WardenResult<Option<SnapshotInfo>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("open ledger", &self.path, e)),
        };
        let mut first = Vec::new();
        BufReader::new(file)
            .read_until(b'\n', &mut first)
            .map_err(|e| io_error("read ledger", &self.path, e))?;
        if first.last() != Some(&b'\n') {
            return Ok(None);
        }

        match serde_json::from_slice::<LedgerLine>(&first) {
            Ok(LedgerLine::Snapshot(snapshot)) => {
                snapshot.verify(&self.key)?;
                Ok(Some(SnapshotInfo {
                    anchor: snapshot.anchor(),
                    checkpoint: snapshot.checkpoint,
                }))
            }
            _ => Ok(None),
        }
    }

    fn compact(&self, keep_from: u64, checkpoint: Option<Value>) -> WardenResult<ChainAnchor> {
        let mut state = self.lock_state();
        let _lock = self.lock_file()?;
        self.refresh(&mut state)?;

        if !state.verification.valid {
            return Err(WardenError::CompactionRejected {
                reason: "ledger chain is broken; refusing to compact".to_string(),
            });
        }
        let first = state
            .snapshot
            .as_ref()
            .map_or(0, |s| s.compacted_through + 1);
        if keep_from <= first || keep_from > state.next_sequence {
            return Err(WardenError::CompactionRejected {
                reason: format!(
                    "keep_from {} outside ({}, {}]",
                    keep_from, first, state.next_sequence
                ),
            });
        }

        // ── Step 1: Split the verified records at keep_from ──────────────
        let mut root_hash = None;
        let mut dropped = 0u64;
        let mut retained = Vec::new();
        for envelope in self.read_all()? {
            let envelope = envelope?;
            if envelope.sequence < keep_from {
                dropped += 1;
                if envelope.sequence + 1 == keep_from {
                    root_hash = Some(envelope.hash.clone());
                }
            } else {
                retained.push(LedgerLine::Record(envelope).to_line()?);
            }
        }
        let Some(root_hash) = root_hash else {
            return Err(WardenError::CompactionRejected {
                reason: format!("envelope {} not found in ledger", keep_from - 1),
            });
        };

        // ── Step 2: Seal the snapshot ────────────────────────────────────
        let anchor = ChainAnchor {
            compacted_through: keep_from - 1,
            root_hash,
        };
        let envelope_count =
            state.snapshot.as_ref().map_or(0, |s| s.envelope_count) + dropped;
        let snapshot =
            SnapshotRecord::seal(&anchor, envelope_count, checkpoint, Utc::now(), &self.key)?;

        // ── Step 3: Write the new file and swap it in ────────────────────
        let mut contents = LedgerLine::Snapshot(snapshot.clone()).to_line()?;
        for line in &retained {
            contents.extend_from_slice(line);
        }
        self.replace_file(&contents)?;

        state.len = contents.len() as u64;
        state.records = retained.len() as u64;
        state.snapshot = Some(snapshot);
        state.verification = ChainVerification::intact(state.records, state.head_hash.clone());

        info!(
            compacted_through = anchor.compacted_through,
            removed = dropped,
            retained = retained.len(),
            "ledger compacted"
        );
        Ok(anchor)
    }
}

impl FileLedger {
    /// Atomically replace the ledger file: temp file, fsync, rename.
    fn replace_file(&self, contents: &[u8]) -> WardenResult<()> {
        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| io_error("create temp file in", &self.dir, e))?;
        temp.as_file_mut()
            .write_all(contents)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| io_error("write compacted ledger", temp.path(), e))?;
        temp.persist(&self.path)
            .map_err(|e| io_error("replace ledger", &self.path, e.error))?;

        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }
        Ok(())
    }
}

fn append_once(path: &Path, line: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line)?;
    file.sync_data()
}

fn truncate_to(path: &Path, len: u64) -> WardenResult<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| io_error("open ledger for truncation", path, e))?;
    file.set_len(len)
        .and_then(|()| file.sync_all())
        .map_err(|e| io_error("truncate ledger", path, e))?;
    warn!(path = %path.display(), len, "ledger truncated to last complete record");
    Ok(())
}

// ── Recovery scan ────────────────────────────────────────────────────────────

struct Scan {
    state: WriterState,
    discarded_bytes: u64,
}

/// Read the whole file, find the last complete record and verify the chain.
///
/// Only bytes after the last newline can be a torn append. A complete line
/// that fails to parse was altered after it was written, so the chain is
/// reported broken at the sequence that line would hold.
fn scan(path: &Path, key: &SigningKey) -> WardenResult<Scan> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(io_error("read ledger", path, e)),
    };

    let mut lines = Vec::new();
    let mut offset = 0usize;
    while let Some(end) = bytes[offset..].iter().position(|&b| b == b'\n') {
        lines.push(offset..offset + end);
        offset += end + 1;
    }
    let len = offset as u64;
    let discarded_bytes = (bytes.len() - offset) as u64;
    if discarded_bytes > 0 {
        warn!(bytes = discarded_bytes, "discarding incomplete trailing record");
    }

    let mut parsed = Vec::with_capacity(lines.len());
    let mut unreadable = None;
    for (idx, range) in lines.iter().enumerate() {
        let raw = &bytes[range.clone()];
        if raw.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<LedgerLine>(raw) {
            Ok(line) => parsed.push((idx as u64 + 1, line)),
            Err(e) => {
                error!(line = idx + 1, error = %e, "unreadable ledger record");
                unreadable = Some(format!("ledger line {} is unreadable: {}", idx + 1, e));
                break;
            }
        }
    }

    let mut snapshot: Option<SnapshotRecord> = None;
    let mut envelopes = Vec::with_capacity(parsed.len());
    for (position, (line_no, line)) in parsed.into_iter().enumerate() {
        match line {
            LedgerLine::Snapshot(record) if position == 0 => snapshot = Some(record),
            LedgerLine::Snapshot(_) => {
                return Err(WardenError::LedgerCorrupt {
                    line: line_no,
                    reason: "snapshot record after the first line".to_string(),
                })
            }
            LedgerLine::Record(envelope) => envelopes.push(envelope),
        }
    }

    let anchor = snapshot.as_ref().map(SnapshotRecord::anchor);
    let mut verifier = ChainVerifier::from_anchor(key, anchor.as_ref());
    let mut broken = match snapshot.as_ref().map(|s| s.verify(key)) {
        Some(Err(err)) => Some(broken_result(err, &verifier)),
        _ => None,
    };
    if broken.is_none() {
        for envelope in &envelopes {
            if let Err(err) = verifier.push(envelope) {
                broken = Some(broken_result(err, &verifier));
                break;
            }
        }
    }
    if broken.is_none() {
        broken = unreadable.map(|reason| {
            ChainVerification::broken(
                verifier.next_sequence(),
                reason,
                verifier.verified(),
                verifier.last_hash(),
            )
        });
    }
    let next_sequence = verifier.next_sequence();
    let head_hash = verifier.last_hash().to_string();
    let verification = broken.unwrap_or_else(|| verifier.finish());

    Ok(Scan {
        state: WriterState {
            len,
            records: envelopes.len() as u64,
            snapshot,
            next_sequence,
            head_hash,
            verification,
        },
        discarded_bytes,
    })
}

// ── Lazy reader ──────────────────────────────────────────────────────────────

/// Streams envelope records from a fresh file handle.
struct RecordIter {
    reader: Option<BufReader<File>>,
    line: u64,
}

impl RecordIter {
    fn new(file: File) -> Self {
        Self {
            reader: Some(BufReader::new(file)),
            line: 0,
        }
    }
}

impl Iterator for RecordIter {
    type Item = WardenResult<DecisionEnvelope>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let reader = self.reader.as_mut()?;
            let mut buf = Vec::new();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => {
                    self.reader = None;
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    self.reader = None;
                    return Some(Err(WardenError::LedgerIo {
                        reason: format!("failed to read ledger: {}", e),
                    }));
                }
            }
            self.line += 1;

            if buf.last() != Some(&b'\n') {
                debug!(line = self.line, "skipping incomplete trailing record");
                self.reader = None;
                return None;
            }
            if buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match serde_json::from_slice::<LedgerLine>(&buf) {
                Ok(LedgerLine::Record(envelope)) => return Some(Ok(envelope)),
                Ok(LedgerLine::Snapshot(_)) => continue,
                Err(e) => {
                    self.reader = None;
                    return Some(Err(WardenError::LedgerCorrupt {
                        line: self.line,
                        reason: e.to_string(),
                    }));
                }
            }
        }
    }
}
