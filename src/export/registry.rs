//! Output slot numbering.
//!
//! Crop pairs are stored in numbered `pair_<N>` directories. Numbers are handed
//! out by an [`OutputRegistry`], so callers never infer the next number from a
//! directory listing themselves.
//!
//! [`DirectoryRegistry`] starts one past the highest existing slot and claims
//! each number by creating its directory exclusively. A number that another
//! process claimed in the meantime fails with `AlreadyExists` and the registry
//! moves on to the next one, so concurrent writers sharing an output directory
//! never receive the same number. A claimed slot whose write failed is
//! released again, removing its directory while it is still empty.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::OutputError;

/// Prefix of slot directory names.
pub const SLOT_PREFIX: &str = "pair_";

/// Directory name of slot `id`.
pub fn slot_dir_name(id: u64) -> String {
    format!("{SLOT_PREFIX}{id}")
}

/// Parses the number out of a `pair_<N>` name.
pub fn parse_slot_id(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(SLOT_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Highest `pair_<N>` directory directly under `base`, if any.
///
/// A missing `base` has no slots.
pub fn scan_max_slot(base: &Path) -> Result<Option<u64>, OutputError> {
    let entries = match std::fs::read_dir(base) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(OutputError::io(base, e)),
    };

    let mut max = None;
    for entry in entries {
        let entry = entry.map_err(|e| OutputError::io(base, e))?;
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }
        if let Some(id) = entry.file_name().to_str().and_then(parse_slot_id) {
            max = max.max(Some(id));
        }
    }
    Ok(max)
}

/// Next slot number for `base`: one past the highest existing slot, or 1.
///
/// This is a plain scan and reserves nothing; use a registry when writing.
pub fn allocate(base: &Path) -> Result<u64, OutputError> {
    Ok(scan_max_slot(base)?.map_or(1, |max| max + 1))
}

/// Source of collision-free slot numbers.
pub trait OutputRegistry: Send {
    /// Reserves and returns the next slot number.
    fn next_id(&mut self) -> Result<u64, OutputError>;

    /// Marks a reserved slot as fully written.
    fn record_written(&mut self, id: u64) -> Result<(), OutputError>;

    /// Gives back a reserved slot that was never written.
    fn release(&mut self, id: u64) -> Result<(), OutputError>;

    /// Slots recorded as written, in recording order.
    fn written(&self) -> &[u64];
}

/// Registry backed by slot directories under an output base.
#[derive(Debug)]
pub struct DirectoryRegistry {
    base: PathBuf,
    cursor: Option<u64>,
    claimed: BTreeSet<u64>,
    written: Vec<u64>,
}

impl DirectoryRegistry {
    /// Creates a registry for `base`. Nothing touches the filesystem until
    /// the first number is requested.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            cursor: None,
            claimed: BTreeSet::new(),
            written: Vec::new(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl OutputRegistry for DirectoryRegistry {
    fn next_id(&mut self) -> Result<u64, OutputError> {
        let mut candidate = match self.cursor {
            Some(cursor) => cursor,
            None => {
                std::fs::create_dir_all(&self.base).map_err(|e| OutputError::io(&self.base, e))?;
                allocate(&self.base)?
            }
        };

        loop {
            let path = self.base.join(slot_dir_name(candidate));
            match std::fs::create_dir(&path) {
                Ok(()) => {
                    self.cursor = Some(candidate + 1);
                    self.claimed.insert(candidate);
                    return Ok(candidate);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(slot = candidate, "Slot already taken, advancing");
                    candidate += 1;
                }
                Err(e) => return Err(OutputError::io(path, e)),
            }
        }
    }

    fn record_written(&mut self, id: u64) -> Result<(), OutputError> {
        if !self.claimed.contains(&id) {
            return Err(OutputError::UnknownSlot(id));
        }
        self.written.push(id);
        Ok(())
    }

    fn release(&mut self, id: u64) -> Result<(), OutputError> {
        if !self.claimed.remove(&id) {
            return Err(OutputError::UnknownSlot(id));
        }

        let path = self.base.join(slot_dir_name(id));
        match std::fs::remove_dir(&path) {
            Ok(()) => {
                debug!(slot = id, "Released unwritten slot");
                if self.cursor.is_some_and(|cursor| cursor > id) {
                    self.cursor = Some(id);
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            // remove_dir refuses non-empty directories; leave those in place
            Err(e) => warn!(slot = id, error = %e, "Could not remove released slot"),
        }
        Ok(())
    }

    fn written(&self) -> &[u64] {
        &self.written
    }
}

/// Registry that keeps its counter in memory.
#[derive(Debug, Clone)]
pub struct InMemoryRegistry {
    next: u64,
    issued: BTreeSet<u64>,
    written: Vec<u64>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Registry whose first number is `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: first,
            issued: BTreeSet::new(),
            written: Vec::new(),
        }
    }

    /// Registry that continues after the highest of `existing`.
    pub fn with_existing(existing: impl IntoIterator<Item = u64>) -> Self {
        Self::starting_at(existing.into_iter().max().map_or(1, |max| max + 1))
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputRegistry for InMemoryRegistry {
    fn next_id(&mut self) -> Result<u64, OutputError> {
        let id = self.next;
        self.next += 1;
        self.issued.insert(id);
        Ok(id)
    }

    fn record_written(&mut self, id: u64) -> Result<(), OutputError> {
        if !self.issued.contains(&id) {
            return Err(OutputError::UnknownSlot(id));
        }
        self.written.push(id);
        Ok(())
    }

    fn release(&mut self, id: u64) -> Result<(), OutputError> {
        if !self.issued.remove(&id) {
            return Err(OutputError::UnknownSlot(id));
        }
        if id + 1 == self.next {
            self.next = id;
        }
        Ok(())
    }

    fn written(&self) -> &[u64] {
        &self.written
    }
}
