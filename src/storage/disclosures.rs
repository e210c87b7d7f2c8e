//! Disclosure Ledger.
//!
//! A grant is a symmetric, permanent fact: within one thread, both
//! organizations may see each other's real contact record. At most one
//! grant exists per thread; the pair is stored ordered (`org_a < org_b`).
//!
//! [`DisclosureLedger::counterpart_real_contact`] is the only path by which
//! a counterpart's contact record leaves the system.

use chrono::{DateTime, Utc};

use crate::organization::ContactRecord;
use crate::storage::conversion_failure;
use crate::storage::organizations::OrganizationDirectory;
use crate::time_utils;
use crate::{ExchangeError, ExchangeResult};
use rusqlite::{params, Connection, OptionalExtension};

pub struct DisclosureLedger;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisclosureGrant {
    pub thread_id: String,
    pub org_a: String,
    pub org_b: String,
    pub created_at: DateTime<Utc>,
}

impl DisclosureGrant {
    pub fn counterpart_of(&self, org_id: &str) -> Option<&str> {
        if self.org_a == org_id {
            Some(&self.org_b)
        } else if self.org_b == org_id {
            Some(&self.org_a)
        } else {
            None
        }
    }
}

fn ordered<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl DisclosureLedger {
    /// Records the grant for `thread_id`. Re-granting the same pair is a
    /// no-op; returns true only when a new grant was written.
    pub fn grant(conn: &Connection, thread_id: &str, org_a: &str, org_b: &str) -> ExchangeResult<bool> {
        if org_a == org_b {
            return Err(ExchangeError::Validation(
                "a disclosure grant needs two distinct organizations".into(),
            ));
        }
        let (a, b) = ordered(org_a, org_b);

        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO contact_disclosures (thread_id, org_a, org_b, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![thread_id, a, b, time_utils::to_sqlite(&time_utils::now())],
            )
            .map_err(|e| ExchangeError::storage("Insert disclosure failed", e))?;

        if inserted == 0 {
            // Existing grant must be for the same pair
            let existing = Self::get(conn, thread_id)?;
            if let Some(g) = existing {
                if g.org_a != a || g.org_b != b {
                    return Err(ExchangeError::Storage(format!(
                        "thread {} already has a grant for a different pair",
                        thread_id
                    )));
                }
            }
            return Ok(false);
        }

        tracing::info!(thread_id = %thread_id, org_a = %a, org_b = %b, "Contact disclosure granted");
        Ok(true)
    }

    pub fn get(conn: &Connection, thread_id: &str) -> ExchangeResult<Option<DisclosureGrant>> {
        conn.query_row(
            "SELECT thread_id, org_a, org_b, created_at FROM contact_disclosures WHERE thread_id = ?1",
            params![thread_id],
            |r| {
                let created: String = r.get(3)?;
                Ok(DisclosureGrant {
                    thread_id: r.get(0)?,
                    org_a: r.get(1)?,
                    org_b: r.get(2)?,
                    created_at: time_utils::from_sqlite(&created).map_err(conversion_failure)?,
                })
            },
        )
        .optional()
        .map_err(|e| ExchangeError::storage("Get disclosure failed", e))
    }

    pub fn is_disclosed(conn: &Connection, thread_id: &str, org_id: &str) -> ExchangeResult<bool> {
        let found: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM contact_disclosures
                 WHERE thread_id = ?1 AND (org_a = ?2 OR org_b = ?2)",
                params![thread_id, org_id],
                |r| r.get(0),
            )
            .map_err(|e| ExchangeError::storage("Check disclosure failed", e))?;
        Ok(found)
    }

    /// Thread ids where `org_id` is party to a grant.
    pub fn threads_disclosed_to(conn: &Connection, org_id: &str) -> ExchangeResult<Vec<String>> {
        let mut stmt = conn
            .prepare(
                "SELECT thread_id FROM contact_disclosures WHERE org_a = ?1 OR org_b = ?1
                 ORDER BY created_at DESC",
            )
            .map_err(|e| ExchangeError::storage("Prepare disclosure query failed", e))?;
        let ids = stmt
            .query_map(params![org_id], |r| r.get(0))
            .map_err(|e| ExchangeError::storage("Disclosure query failed", e))?
            .filter_map(|r| match r {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable disclosure row");
                    None
                }
            })
            .collect();
        Ok(ids)
    }

    /// The other party's real contact record, or `None` without a grant
    /// covering `viewer_org_id` in this thread.
    pub fn counterpart_real_contact(
        conn: &Connection,
        thread_id: &str,
        viewer_org_id: &str,
    ) -> ExchangeResult<Option<ContactRecord>> {
        let Some(grant) = Self::get(conn, thread_id)? else {
            return Ok(None);
        };
        let Some(counterpart) = grant.counterpart_of(viewer_org_id) else {
            return Ok(None);
        };
        OrganizationDirectory::real_contact(conn, counterpart)
    }
}
