//! Ways into the engine
//!
//! In-game commands, the operator console, composition sessions, the control
//! socket and the Discord bridge. Each one only translates its own input into
//! engine calls and the outcome back into text.

pub mod bridge;
pub mod commands;
pub mod console;
pub mod session;
pub mod socket;
