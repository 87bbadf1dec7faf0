//! Process launching backends.
//!
//! Every environment driver ultimately spawns a local process (the multiplexer,
//! container runtime or ssh client); this module owns that spawn and the event stream
//! that comes with it.

pub mod local;

pub use local::{LocalLauncher, LocalProcessHandle, ProcessEventStream};
