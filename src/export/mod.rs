//! Output slots for produced crop pairs.
//!
//! Layout: `<output_root>/<disaster>/<location>/pair_<N>/{before_<name>, after_<name>}`.
//! Slots are only ever added; re-running a location appends after the
//! highest existing number.

pub mod registry;
pub mod writer;

pub use registry::{
    allocate, parse_slot_id, scan_max_slot, slot_dir_name, DirectoryRegistry, InMemoryRegistry,
    OutputRegistry, SLOT_PREFIX,
};
pub use writer::{persist_crop, write_slot, SlotNames, FALLBACK_FORMAT};
