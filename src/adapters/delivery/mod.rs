//! Outbound delivery of price messages.

pub mod validator_ws;

pub use validator_ws::ValidatorSink;
