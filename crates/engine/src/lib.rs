pub mod controller;
pub mod errors;

pub use controller::{CreateRound, RoundDetails, WorkflowController};
pub use errors::WorkflowError;
