//! Event delivery from the worker running a session to whoever observes it.

pub mod event_hub;

pub use event_hub::{EventHub, EventStream};
