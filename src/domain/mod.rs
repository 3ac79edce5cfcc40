//! Domain Layer
//!
//! Pure types and logic with no transport or platform dependencies:
//! connector events, scan-filter compilation, payload byte codecs, and
//! persisted settings.

pub mod criteria;
pub mod encoding;
pub mod models;
pub mod settings;
