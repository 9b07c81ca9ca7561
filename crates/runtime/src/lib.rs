//! The agent turn loop: streams model output to the caller, executes
//! requested tools between rounds, and persists the conversation when the
//! turn completes.

mod agent;

pub use agent::{Agent, TurnToken, MAX_TOOL_ROUNDS};
