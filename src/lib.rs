//! Resource Exchange: anonymity-preserving resource-sharing marketplace.
//!
//! Member organizations post staff, staffing requests, special skills and
//! tools. Counterparts negotiate under pseudonymous handles; real contact
//! records are disclosed to both sides only when the owner awards a thread.

// Foundation
pub mod constants;
pub mod error;
pub mod id_gen;
pub mod time_utils;

// Domain types
pub mod listing;
pub mod message;
pub mod organization;

// Sub-systems
pub mod config;
pub mod negotiation;
pub mod notify;
pub mod relay;
pub mod storage;
pub mod tracing_init;
pub mod views;

#[cfg(test)]
pub(crate) mod test_helpers;

// Re-exports for convenience
pub use error::{ExchangeError, ExchangeResult};
