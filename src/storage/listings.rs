//! Listing Store: resource listings and their reservation state.
//!
//! `reserve` is the only contended write in the system. It is a single
//! conditional UPDATE keyed on `state = 'open'`; the affected-row count is
//! the verdict, so two sessions racing for one listing can never both win.

use chrono::{DateTime, Utc};

use crate::listing::{Category, Listing, NewListing, PriceKind, ReservationState, ValidityWindow};
use crate::storage::conversion_failure;
use crate::storage::organizations::OrganizationDirectory;
use crate::{id_gen, time_utils};
use crate::{ExchangeError, ExchangeResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

pub struct ListingStore;

/// Outcome of the atomic `open → reserved` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved,
    /// The listing was no longer open when the update ran.
    Conflict,
}

// ── Row mapping ──
//
// Every listing is normalized here, once. Rows migrated from the legacy
// schema already carry a category (see migrations V2).

fn listing_from_row(row: &Row) -> rusqlite::Result<Listing> {
    let category_str: String = row.get("category")?;
    let state_str: String = row.get("state")?;
    let price_kind_str: Option<String> = row.get("price_kind")?;
    let tags_json: String = row.get("skill_tags")?;
    let from_str: String = row.get("window_from")?;
    let to_str: String = row.get("window_to")?;
    let created_str: String = row.get("created_at")?;

    let from = time_utils::date_from_sqlite(&from_str).map_err(conversion_failure)?;
    let to = time_utils::date_from_sqlite(&to_str).map_err(conversion_failure)?;
    let price_kind = price_kind_str
        .map(|s| s.parse::<PriceKind>())
        .transpose()
        .map_err(conversion_failure)?;

    Ok(Listing {
        id: row.get("id")?,
        owner_org_id: row.get("owner_org_id")?,
        category: category_str.parse::<Category>().map_err(conversion_failure)?,
        descriptor: row.get("descriptor")?,
        window: ValidityWindow { from, to },
        location: row.get("location")?,
        notes: row.get("notes")?,
        contact_info: row.get("contact_info")?,
        skill_tags: serde_json::from_str(&tags_json).map_err(conversion_failure)?,
        price: row.get("price")?,
        price_kind,
        state: state_str.parse::<ReservationState>().map_err(conversion_failure)?,
        reserved_by: row.get("reserved_by")?,
        created_at: time_utils::from_sqlite(&created_str).map_err(conversion_failure)?,
    })
}

impl ListingStore {
    /// Validates and persists a new open listing owned by `owner_org_id`.
    pub fn create(conn: &Connection, owner_org_id: &str, new: NewListing) -> ExchangeResult<Listing> {
        let mut new = new;
        new.validate()?;
        OrganizationDirectory::require(conn, owner_org_id)?;

        let listing = Listing {
            id: id_gen::listing_id(),
            owner_org_id: owner_org_id.to_string(),
            category: new.category,
            descriptor: new.descriptor,
            window: new.window,
            location: new.location,
            notes: new.notes,
            contact_info: new.contact_info,
            skill_tags: new.skill_tags,
            price: new.price,
            price_kind: new.price_kind,
            state: ReservationState::Open,
            reserved_by: None,
            created_at: time_utils::now(),
        };

        conn.execute(
            "INSERT INTO listings (
                id, owner_org_id, category, descriptor, window_from, window_to,
                location, notes, contact_info, is_special, skill_tags,
                price, price_kind, state, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                listing.id,
                listing.owner_org_id,
                listing.category.as_str(),
                listing.descriptor,
                time_utils::date_to_sqlite(&listing.window.from),
                time_utils::date_to_sqlite(&listing.window.to),
                listing.location,
                listing.notes,
                listing.contact_info,
                (listing.category == Category::OfferingSpecialSkill) as i32,
                serde_json::to_string(&listing.skill_tags).unwrap_or_else(|_| "[]".into()),
                listing.price,
                listing.price_kind.map(|k| k.as_str()),
                listing.state.as_str(),
                time_utils::to_sqlite(&listing.created_at),
            ],
        )
        .map_err(|e| ExchangeError::storage("Insert listing failed", e))?;

        tracing::info!(
            listing_id = %listing.id,
            owner = %listing.owner_org_id,
            category = %listing.category,
            "Listing created"
        );
        Ok(listing)
    }

    pub fn get(conn: &Connection, id: &str) -> ExchangeResult<Option<Listing>> {
        conn.query_row("SELECT * FROM listings WHERE id = ?1", params![id], listing_from_row)
            .optional()
            .map_err(|e| ExchangeError::storage("Get listing failed", e))
    }

    pub fn require(conn: &Connection, id: &str) -> ExchangeResult<Listing> {
        Self::get(conn, id)?.ok_or_else(|| ExchangeError::ListingNotFound(id.to_string()))
    }

    /// Open listings whose window ends at or after `as_of`, newest first.
    /// Includes the caller's own listings; "is mine" is a view annotation.
    pub fn list_open_for_marketplace(conn: &Connection, as_of: DateTime<Utc>) -> ExchangeResult<Vec<Listing>> {
        let listings = Self::query(
            conn,
            "SELECT * FROM listings WHERE state = 'open' ORDER BY created_at DESC, rowid DESC",
            &[],
        )?;
        Ok(listings
            .into_iter()
            .filter(|l| l.window.is_live_at(as_of))
            .collect())
    }

    pub fn list_by_owner(conn: &Connection, org_id: &str) -> ExchangeResult<Vec<Listing>> {
        Self::query(
            conn,
            "SELECT * FROM listings WHERE owner_org_id = ?1 ORDER BY created_at DESC, rowid DESC",
            &[&org_id],
        )
    }

    pub fn list_by_reserver(conn: &Connection, org_id: &str) -> ExchangeResult<Vec<Listing>> {
        Self::query(
            conn,
            "SELECT * FROM listings WHERE reserved_by = ?1 ORDER BY created_at DESC, rowid DESC",
            &[&org_id],
        )
    }

    fn query(conn: &Connection, sql: &str, args: &[&dyn rusqlite::ToSql]) -> ExchangeResult<Vec<Listing>> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| ExchangeError::storage("Prepare listing query failed", e))?;

        let listings = stmt
            .query_map(args, listing_from_row)
            .map_err(|e| ExchangeError::storage("Listing query failed", e))?
            .filter_map(|r| match r {
                Ok(l) => Some(l),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable listing row");
                    None
                }
            })
            .collect();

        Ok(listings)
    }

    /// Atomic `open → reserved` check-and-set.
    pub fn reserve(conn: &Connection, listing_id: &str, reserving_org_id: &str) -> ExchangeResult<ReserveOutcome> {
        let changed = conn
            .execute(
                "UPDATE listings SET state = 'reserved', reserved_by = ?2
                 WHERE id = ?1 AND state = 'open'",
                params![listing_id, reserving_org_id],
            )
            .map_err(|e| ExchangeError::storage("Reserve listing failed", e))?;

        if changed == 1 {
            tracing::info!(listing_id = %listing_id, reserved_by = %reserving_org_id, "Listing reserved");
            return Ok(ReserveOutcome::Reserved);
        }

        // Distinguish a lost race from a dangling id
        Self::require(conn, listing_id)?;
        tracing::debug!(listing_id = %listing_id, org = %reserving_org_id, "Reservation conflict");
        Ok(ReserveOutcome::Conflict)
    }
}
