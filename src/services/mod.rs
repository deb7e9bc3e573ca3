//! Service layer.
//!
//! Domain logic separated from UI concerns, usable by the CLI or an
//! embedding web server.

pub mod intake;

pub use intake::{IntakeError, IntakeService};
