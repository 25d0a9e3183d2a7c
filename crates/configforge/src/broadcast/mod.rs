//! Broadcasting for engine events.
//!
//! The bus is created explicitly and handed to whatever needs it; the CLI
//! and any other front end subscribe to the same handle.

pub mod event_bus;

pub use event_bus::{map_file_event, AppEvent, EventBus, Severity};
