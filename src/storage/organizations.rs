//! Identity & Organization Directory.
//!
//! Maps an authenticated user (opaque id from the external identity provider)
//! to exactly one organization. Public reads return [`Organization`], which
//! carries the pseudonymous handle only. The real contact record is readable
//! by its owner through [`OrganizationDirectory::own_contact`] and by a
//! counterpart only through the disclosure ledger.

use crate::constants::MAX_HANDLE_ATTEMPTS;
use crate::error::is_constraint_violation;
use crate::id_gen;
use crate::organization::{ContactRecord, Organization};
use crate::storage::conversion_failure;
use crate::time_utils;
use crate::{ExchangeError, ExchangeResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

pub struct OrganizationDirectory;

/// Result of a registration: the organization plus the plain verification
/// code, which is mailed once and never stored.
#[derive(Debug, Clone)]
pub struct Registration {
    pub organization: Organization,
    pub verification_code: String,
}

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

fn organization_from_row(row: &Row) -> rusqlite::Result<Organization> {
    let created_str: String = row.get("created_at")?;
    let verified_at: Option<String> = row.get("verified_at")?;
    Ok(Organization {
        id: row.get("id")?,
        handle: row.get("handle")?,
        user_id: row.get("user_id")?,
        verified: verified_at.is_some(),
        created_at: time_utils::from_sqlite(&created_str).map_err(conversion_failure)?,
    })
}

fn contact_from_row(row: &Row) -> rusqlite::Result<ContactRecord> {
    Ok(ContactRecord {
        company_name: row.get("company_name")?,
        email: row.get("email")?,
        phone: row.get("phone")?,
        address: row.get("address")?,
    })
}

fn validate_contact(contact: &ContactRecord) -> ExchangeResult<()> {
    for (field, value) in [
        ("company_name", &contact.company_name),
        ("email", &contact.email),
        ("phone", &contact.phone),
        ("address", &contact.address),
    ] {
        if value.trim().is_empty() {
            return Err(ExchangeError::Validation(format!("{} is required", field)));
        }
    }
    let re = regex::Regex::new(EMAIL_PATTERN)
        .map_err(|e| ExchangeError::Validation(format!("email pattern: {}", e)))?;
    if !re.is_match(contact.email.trim()) {
        return Err(ExchangeError::Validation(format!(
            "invalid email address: {}",
            contact.email
        )));
    }
    Ok(())
}

impl OrganizationDirectory {
    /// Registers the organization owned by `user_id` and assigns it a fresh
    /// pseudonymous handle.
    pub fn register(
        conn: &Connection,
        user_id: &str,
        contact: &ContactRecord,
    ) -> ExchangeResult<Registration> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ExchangeError::Validation("user id is required".into()));
        }
        validate_contact(contact)?;
        if Self::resolve_user(conn, user_id)?.is_some() {
            return Err(ExchangeError::Validation(format!(
                "user {} already owns an organization",
                user_id
            )));
        }

        let id = id_gen::organization_id();
        let code = id_gen::verification_code();
        let created_at = time_utils::now();

        for attempt in 1..=MAX_HANDLE_ATTEMPTS {
            let handle = id_gen::pseudonymous_handle();
            let inserted = conn.execute(
                "INSERT INTO organizations (id, handle, user_id, company_name, email, phone, address,
                                            verification_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    handle,
                    user_id,
                    contact.company_name.trim(),
                    contact.email.trim(),
                    contact.phone.trim(),
                    contact.address.trim(),
                    id_gen::hash_code(&code),
                    time_utils::to_sqlite(&created_at),
                ],
            );

            match inserted {
                Ok(_) => {
                    tracing::info!(org_id = %id, handle = %handle, "Organization registered");
                    return Ok(Registration {
                        organization: Organization {
                            id,
                            handle,
                            user_id: user_id.to_string(),
                            verified: false,
                            created_at,
                        },
                        verification_code: code,
                    });
                }
                Err(e) if is_constraint_violation(&e) && Self::handle_taken(conn, &handle)? => {
                    tracing::debug!(attempt, handle = %handle, "Handle collision, retrying");
                }
                Err(e) => return Err(ExchangeError::storage("Register organization failed", e)),
            }
        }

        Err(ExchangeError::Storage(format!(
            "could not allocate a unique handle after {} attempts",
            MAX_HANDLE_ATTEMPTS
        )))
    }

    fn handle_taken(conn: &Connection, handle: &str) -> ExchangeResult<bool> {
        let taken: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM organizations WHERE handle = ?1",
                params![handle],
                |r| r.get(0),
            )
            .map_err(|e| ExchangeError::storage("Check handle failed", e))?;
        Ok(taken)
    }

    pub fn get(conn: &Connection, org_id: &str) -> ExchangeResult<Option<Organization>> {
        conn.query_row(
            "SELECT * FROM organizations WHERE id = ?1",
            params![org_id],
            organization_from_row,
        )
        .optional()
        .map_err(|e| ExchangeError::storage("Get organization failed", e))
    }

    pub fn require(conn: &Connection, org_id: &str) -> ExchangeResult<Organization> {
        Self::get(conn, org_id)?.ok_or_else(|| ExchangeError::OrganizationNotFound(org_id.to_string()))
    }

    /// Resolves an identity-provider user to its organization, if any.
    pub fn resolve_user(conn: &Connection, user_id: &str) -> ExchangeResult<Option<Organization>> {
        conn.query_row(
            "SELECT * FROM organizations WHERE user_id = ?1",
            params![user_id],
            organization_from_row,
        )
        .optional()
        .map_err(|e| ExchangeError::storage("Resolve user failed", e))
    }

    pub fn handle(conn: &Connection, org_id: &str) -> ExchangeResult<String> {
        conn.query_row(
            "SELECT handle FROM organizations WHERE id = ?1",
            params![org_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| ExchangeError::storage("Get handle failed", e))?
        .ok_or_else(|| ExchangeError::OrganizationNotFound(org_id.to_string()))
    }

    /// The owner's own contact record. Anyone else gets `Forbidden`.
    pub fn own_contact(conn: &Connection, org_id: &str, user_id: &str) -> ExchangeResult<ContactRecord> {
        let org = Self::require(conn, org_id)?;
        if org.user_id != user_id {
            return Err(ExchangeError::Forbidden(format!(
                "user {} does not own organization {}",
                user_id, org_id
            )));
        }
        Self::real_contact(conn, org_id)?
            .ok_or_else(|| ExchangeError::OrganizationNotFound(org_id.to_string()))
    }

    pub fn update_contact(
        conn: &Connection,
        org_id: &str,
        user_id: &str,
        contact: &ContactRecord,
    ) -> ExchangeResult<()> {
        validate_contact(contact)?;
        let org = Self::require(conn, org_id)?;
        if org.user_id != user_id {
            return Err(ExchangeError::Forbidden(format!(
                "user {} does not own organization {}",
                user_id, org_id
            )));
        }
        conn.execute(
            "UPDATE organizations SET company_name = ?2, email = ?3, phone = ?4, address = ?5
             WHERE id = ?1",
            params![
                org_id,
                contact.company_name.trim(),
                contact.email.trim(),
                contact.phone.trim(),
                contact.address.trim(),
            ],
        )
        .map_err(|e| ExchangeError::storage("Update contact failed", e))?;
        tracing::info!(org_id = %org_id, "Organization contact updated");
        Ok(())
    }

    /// Confirms the mailed verification code. Returns false on mismatch.
    /// Verifying an already verified organization is a no-op success.
    pub fn verify(conn: &Connection, org_id: &str, code: &str) -> ExchangeResult<bool> {
        let row: Option<(Option<String>, Option<String>)> = conn
            .query_row(
                "SELECT verification_hash, verified_at FROM organizations WHERE id = ?1",
                params![org_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(|e| ExchangeError::storage("Read verification failed", e))?;

        let (hash, verified_at) =
            row.ok_or_else(|| ExchangeError::OrganizationNotFound(org_id.to_string()))?;
        if verified_at.is_some() {
            return Ok(true);
        }
        if hash.as_deref() != Some(id_gen::hash_code(code).as_str()) {
            tracing::debug!(org_id = %org_id, "Verification code mismatch");
            return Ok(false);
        }
        conn.execute(
            "UPDATE organizations SET verified_at = ?2 WHERE id = ?1 AND verified_at IS NULL",
            params![org_id, time_utils::to_sqlite(&time_utils::now())],
        )
        .map_err(|e| ExchangeError::storage("Mark verified failed", e))?;
        tracing::info!(org_id = %org_id, "Organization verified");
        Ok(true)
    }

    /// Raw contact read. Crate-private: callers outside the directory must go
    /// through `DisclosureLedger::counterpart_real_contact`.
    pub(crate) fn real_contact(conn: &Connection, org_id: &str) -> ExchangeResult<Option<ContactRecord>> {
        conn.query_row(
            "SELECT company_name, email, phone, address FROM organizations WHERE id = ?1",
            params![org_id],
            contact_from_row,
        )
        .optional()
        .map_err(|e| ExchangeError::storage("Read contact failed", e))
    }
}
