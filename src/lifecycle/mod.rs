//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (Engine::build in engine.rs):
//!     Load config → Validate → Restore snapshot → Spawn background tasks → Serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → monitor, refresher and server stop → Save snapshot
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - One broadcast channel fans the stop signal out to every background task
//! - The snapshot is written only after every writer has stopped

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
