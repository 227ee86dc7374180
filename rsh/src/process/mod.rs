pub mod exec;
mod fork;
pub mod job;
pub mod pipeline;
pub mod redirect;
pub mod signal;
pub mod state;
pub mod terminal;
pub(crate) mod wait;
