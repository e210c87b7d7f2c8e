use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One message of a negotiation thread.
///
/// The first message of a thread carries its own id as `thread_id`;
/// replies reference that id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub sender_org_id: String,
    pub recipient_org_id: String,
    pub listing_id: String,
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_thread_root(&self) -> bool {
        self.id == self.thread_id
    }

    pub fn is_unread(&self) -> bool {
        self.read_at.is_none()
    }

    pub fn involves(&self, org_id: &str) -> bool {
        self.sender_org_id == org_id || self.recipient_org_id == org_id
    }

    /// The other party of this message, seen from `org_id`.
    pub fn counterpart_of(&self, org_id: &str) -> Option<&str> {
        if self.sender_org_id == org_id {
            Some(&self.recipient_org_id)
        } else if self.recipient_org_id == org_id {
            Some(&self.sender_org_id)
        } else {
            None
        }
    }
}
