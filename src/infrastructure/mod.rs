//! Infrastructure Layer
//!
//! Everything that touches the outside world: the Bluetooth transport core
//! and the tracing/logging setup. Domain logic stays in [`crate::domain`].

pub mod bluetooth;
pub mod logging;
