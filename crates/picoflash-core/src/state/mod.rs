//! State machine module.

pub mod handlers;
pub mod machine;

pub use handlers::{HandlerContext, handle_state};
pub use machine::{ApplyOutcome, TransferContext, TransferState};
