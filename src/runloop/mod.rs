//! Event loops used by the harness
//!
//! - `listener`: the background listener thread hosting work under test
//! - `main_loop`: the caller's own loop, pumped while waiting
//! - `fixture`: the process-wide listener for suites that share one

pub mod fixture;
pub mod listener;
pub mod main_loop;

pub use fixture::{shared_listener, shared_listener_with};
pub use listener::ListenerContext;
pub use main_loop::{MainLoop, MainLoopHandle};
