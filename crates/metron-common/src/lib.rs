//! Types shared between the metron collectors, transport and agent.

pub mod types;
