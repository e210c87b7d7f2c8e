use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::VoidReason;
use crate::listing::{Listing, ReservationState};

/// Negotiation state of one thread, derived from its listing. Never stored.
///
/// ```text
/// Uninitiated --openThread--> Open --award--> Awarded
///                              |  \
///      listing reserved to     |   window elapsed
///      another pair            v    \
///                            Void   Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationState {
    Open,
    Awarded,
    Void,
    Expired,
}

impl NegotiationState {
    /// `initiator_org_id` is the sender of the thread's first message; the
    /// other party is always the listing owner.
    pub fn derive(listing: &Listing, initiator_org_id: &str, as_of: DateTime<Utc>) -> Self {
        match listing.state {
            ReservationState::Open if listing.window.has_elapsed(as_of) => Self::Expired,
            ReservationState::Open => Self::Open,
            _ if listing.reserved_by.as_deref() == Some(initiator_org_id) => Self::Awarded,
            _ => Self::Void,
        }
    }

    /// None for Open and Awarded: replies stay allowed after the award so
    /// the pair can coordinate.
    pub fn void_reason(&self) -> Option<VoidReason> {
        match self {
            Self::Void => Some(VoidReason::ReservedElsewhere),
            Self::Expired => Some(VoidReason::Expired),
            Self::Open | Self::Awarded => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Awarded => "awarded",
            Self::Void => "void",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
