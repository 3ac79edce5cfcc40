//! Bluetooth Module
//!
//! Transport-agnostic core for driving a Glow device over a GATT-like link.
//! The platform adapter owns the actual Bluetooth stack; everything here
//! assumes only a [`transport::Transport`] that can initiate characteristic
//! writes and reads and reports their completions back.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      DeviceSession                        │
//! │     (public API: deliver / transmit / request / clock     │
//! │      / update_firmware, plus completion callbacks)        │
//! └────────┬───────────────┬───────────────┬─────────────────┘
//!          │               │               │
//!          ▼               ▼               ▼
//! ┌──────────────┐  ┌────────────┐  ┌─────────────┐
//! │ CommandQueue │  │  protocol  │  │ dispatcher  │
//! │  + WriteGate │  │            │  │             │
//! │ - one worker │  │ - framing  │  │ - completion│
//! │ - one write  │  │ - UUIDs    │  │   -> event  │
//! │   in flight  │  │ - OTA wire │  │   mapping   │
//! └──────────────┘  └────────────┘  └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - UUIDs, fragment framing, OTA wire format
//! - [`transport`] - the capability the platform adapter injects
//! - [`queue`] - single-worker serializer and the write gate monitor
//! - [`dispatcher`] - completion callbacks to Resolve/Reject events
//! - [`ota`] - firmware update phases, chunking, and progress
//! - [`session`] - the coordinator tying it all together

pub mod dispatcher;
pub mod ota;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod transport;

// Re-export the session type for convenience
pub use session::DeviceSession;
