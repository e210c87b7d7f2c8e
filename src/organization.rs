use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Real contact record of a member organization.
///
/// Never handed to a counterpart directly: the only way out is
/// `DisclosureLedger::counterpart_real_contact`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactRecord {
    pub company_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
}

/// Public face of an organization: what any member may see.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organization {
    pub id: String,
    /// Pseudonymous handle shown before disclosure. Unique, never reused.
    pub handle: String,
    /// Owning user identity from the external identity provider (1:1).
    pub user_id: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl ContactRecord {
    pub fn new(company_name: &str, email: &str, phone: &str, address: &str) -> Self {
        Self {
            company_name: company_name.trim().to_string(),
            email: email.trim().to_string(),
            phone: phone.trim().to_string(),
            address: address.trim().to_string(),
        }
    }
}
