pub mod engine;
pub mod state;

pub use engine::{AwardReceipt, Clock, NegotiationEngine};
pub use state::NegotiationState;
