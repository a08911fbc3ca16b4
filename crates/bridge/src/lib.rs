//! C entry points for embedding the workstation in a host application.
//!
//! Every function locks the process-wide [`state::STATE`], performs one
//! operation on the session, and reports the outcome as a [`StatusCode`].
//! Functions that produce a value return it on success and the negated
//! status code on failure. Details of the most recent failure are available
//! through `loopdeck_last_error`.

mod commands;
mod poll;
mod state;
mod status;

pub use commands::*;
pub use poll::{POLL_INTERVAL, PollLoop};
pub use state::{BridgeState, Workstation};
pub use status::{BridgeError, BridgeResult, StatusCode};
