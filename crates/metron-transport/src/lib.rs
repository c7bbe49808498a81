//! Resilient HTTP delivery for the metron agent.
//!
//! Outgoing bodies go through a fixed pipeline (JSON → HMAC signature →
//! gzip above a size threshold → hybrid encryption), and every request is
//! wrapped in [`retry::run`] so transient network failures are retried on a
//! configured delay schedule. [`client::MetricsClient`] ties the pieces
//! together behind the [`client::HttpClient`] trait.

pub mod client;
pub mod compress;
pub mod crypto;
pub mod error;
pub mod request;
pub mod response;
pub mod retry;
pub mod signer;

pub use client::{ClientConfig, HttpClient, MetricsClient};
pub use error::TransportError;
