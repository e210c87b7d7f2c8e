//! Presentation projections over the engine's read operations.
//!
//! Counterpart identity is always resolved through
//! `NegotiationEngine::counterpart_contact`: handle before the award,
//! disclosed company name after.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::listing::{Category, Listing};
use crate::message::Message;
use crate::negotiation::NegotiationEngine;
use crate::storage::organizations::OrganizationDirectory;
use crate::{ExchangeError, ExchangeResult};

#[derive(Debug, Clone, Serialize)]
pub struct MarketplaceEntry {
    pub listing: Listing,
    pub owner_handle: String,
    pub is_mine: bool,
}

/// Open marketplace grouped by category, newest first within each group.
pub type MarketplaceView = BTreeMap<Category, Vec<MarketplaceEntry>>;

pub fn marketplace_view(engine: &NegotiationEngine, viewer_org_id: &str) -> ExchangeResult<MarketplaceView> {
    let mut view = MarketplaceView::new();
    for listing in engine.marketplace()? {
        let owner_handle = OrganizationDirectory::handle(engine.conn(), &listing.owner_org_id)?;
        let is_mine = listing.is_owned_by(viewer_org_id);
        view.entry(listing.category).or_default().push(MarketplaceEntry {
            listing,
            owner_handle,
            is_mine,
        });
    }
    Ok(view)
}

#[derive(Debug, Clone, Serialize)]
pub struct InboxEntry {
    pub message: Message,
    /// Counterpart handle, or its company name once disclosed.
    pub counterpart_label: String,
    pub disclosed: bool,
}

pub fn inbox_view(engine: &NegotiationEngine, org_id: &str) -> ExchangeResult<Vec<InboxEntry>> {
    let mut entries = Vec::new();
    for message in engine.inbox(org_id)? {
        let (counterpart_label, disclosed) = counterpart_label(engine, &message, org_id)?;
        entries.push(InboxEntry {
            message,
            counterpart_label,
            disclosed,
        });
    }
    Ok(entries)
}

/// Label for the other side of `message`'s thread, as seen by `viewer_org_id`.
pub fn counterpart_label(
    engine: &NegotiationEngine,
    message: &Message,
    viewer_org_id: &str,
) -> ExchangeResult<(String, bool)> {
    if let Some(contact) = engine.counterpart_contact(&message.thread_id, viewer_org_id)? {
        return Ok((contact.company_name, true));
    }
    let other = message.counterpart_of(viewer_org_id).ok_or_else(|| ExchangeError::NotParticipant {
        thread_id: message.thread_id.clone(),
        org_id: viewer_org_id.to_string(),
    })?;
    Ok((OrganizationDirectory::handle(engine.conn(), other)?, false))
}

/// Informational text for expected outcomes. None means a real error.
pub fn notice_for(err: &ExchangeError) -> Option<String> {
    match err {
        ExchangeError::AlreadyReserved(_) => Some("This opportunity was already filled.".to_string()),
        ExchangeError::ThreadVoid { reason, .. } => Some(match reason {
            crate::error::VoidReason::ReservedElsewhere => {
                "This opportunity was filled by another member. The conversation is closed.".to_string()
            }
            crate::error::VoidReason::Expired => {
                "This opportunity expired before it was filled. The conversation is closed.".to_string()
            }
        }),
        ExchangeError::ListingExpired(_) => Some("This opportunity is no longer available.".to_string()),
        ExchangeError::DuplicateThread { .. } => {
            Some("You already contacted this member about this listing. Reply in the existing thread.".to_string())
        }
        _ => None,
    }
}
