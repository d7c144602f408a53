//! G-code output for FDM printers.

mod file;
pub mod summary;
mod writer;

pub use file::{EncodeStats, GcodeFile};
pub use summary::GcodeSummary;
pub use writer::{GcodeWriter, WriterSettings};

/// Frequencies of the five note scale played when a job starts (ascending)
/// and ends (descending).
pub const TONES: [f64; 5] = [523.251, 587.330, 659.255, 698.456, 783.991];
