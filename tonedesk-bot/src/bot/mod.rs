//! Chat glue between the transport and the orchestrator

pub mod actions;
pub mod dispatcher;
pub mod eq_command;
pub mod handler;
pub mod keyboards;
pub mod poller;
pub mod texts;

pub use dispatcher::Dispatcher;
pub use handler::{EventHandler, Handler};
pub use poller::run_poller;
