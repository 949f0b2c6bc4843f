pub mod constants;
pub mod directory;
pub mod stomp;
pub mod telemetry;
pub mod types;

// Re-export primary types for convenience.
pub use constants::telemetry_topic;
pub use directory::{Device, Machine, Tenant, TenantDirectory};
pub use stomp::{Command, Inbound, StompError, StompFrame};
pub use telemetry::{TelemetryFrame, Timestamp, UeRecord};
pub use types::SessionState;
