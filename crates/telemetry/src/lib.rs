//! Telemetry buffering and export for gNodeB UE frames.
//!
//! [`TelemetryBuffer`] collects frames as the broker delivers them,
//! [`SlotHistory`] keeps short per-slot RSRP series for live display, and
//! [`ExportRequest`] turns a snapshot into a CSV file.

pub mod buffer;
pub mod export;
pub mod history;
pub mod writer;

pub use buffer::{FrameSource, TelemetryBuffer};
pub use export::{Alignment, Row, Table, flatten};
pub use history::{RingBuffer, SlotHistory, SlotReading};
pub use writer::{ExportError, ExportOutcome, ExportRequest, export_file_name, write_csv};
