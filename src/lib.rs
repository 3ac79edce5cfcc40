//! Connector core for Glow mesh devices.
//!
//! A control application talks to a Glow device over a GATT-like transport:
//! a handful of UUID-addressed characteristics that accept one read or write
//! at a time, each confirmed asynchronously. This crate owns everything
//! between the caller's byte-array commands and that transport:
//!
//! - a strictly serialized command queue (one in-flight operation, ever),
//! - a length-prefixed fragmentation codec for payloads larger than the MTU,
//! - response correlation from completion callbacks back to logical
//!   operations,
//! - the OTA firmware-update sequence (reset / begin / write / end) with
//!   progress reporting,
//! - the advertisement filter compiler and parser used to recognize devices.
//!
//! Scanning, device selection, and the meaning of command bytes live in the
//! caller. The platform Bluetooth stack is injected through the
//! [`Transport`](infrastructure::bluetooth::transport::Transport) trait.

pub mod domain;
pub mod infrastructure;

pub use domain::criteria::{build_scan_filters, DeviceCriteria, ScanFilter};
pub use domain::models::{ConnectionState, ConnectorEvent, OperationKind, RejectReason};
pub use domain::settings::Settings;
pub use infrastructure::bluetooth::session::DeviceSession;
pub use infrastructure::bluetooth::transport::{Channel, LinkError, Transport, WriteMode};
