//! Shared test utilities: builders, DB setup, time helpers, test doubles.
//!
//! Available only under `#[cfg(test)]`.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::Connection;

use crate::id_gen;
use crate::listing::{Category, NewListing, PriceKind, ValidityWindow};
use crate::message::Message;
use crate::negotiation::engine::Clock;
use crate::notify::NotificationSender;
use crate::organization::{ContactRecord, Organization};
use crate::storage::migrations;
use crate::storage::organizations::OrganizationDirectory;
use crate::{ExchangeError, ExchangeResult};

// ============================================================================
// Time
// ============================================================================

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Noon UTC on the given day.
pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}

/// Clock the test can move; clones share the same instant.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.now.lock().unwrap() = t;
    }

    pub fn clock(&self) -> Clock {
        let now = self.now.clone();
        Arc::new(move || *now.lock().unwrap())
    }
}

// ============================================================================
// DB setup
// ============================================================================

pub fn setup_exchange_db() -> Connection {
    let conn = Connection::open(":memory:").unwrap();
    conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    migrations::migrate_exchange_db(&conn).unwrap();
    conn
}

pub fn contact(company_name: &str) -> ContactRecord {
    let slug: String = company_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    ContactRecord::new(
        company_name,
        &format!("contact@{}.example.test", slug),
        "+47 22 00 00 00",
        "Storgata 1, Oslo",
    )
}

/// Registers `user` with the company name "<user> Co".
pub fn register_org(conn: &Connection, user: &str) -> Organization {
    OrganizationDirectory::register(conn, user, &contact(&format!("{} Co", user)))
        .unwrap()
        .organization
}

// ============================================================================
// NewListingBuilder
// ============================================================================

pub struct NewListingBuilder {
    listing: NewListing,
}

impl NewListingBuilder {
    pub fn new() -> Self {
        Self {
            listing: NewListing::new(
                Category::OfferingStaff,
                "Electrician",
                ValidityWindow {
                    from: date(2024, 6, 1),
                    to: date(2024, 6, 30),
                },
                "Oslo",
                "Ask for the site manager",
            ),
        }
    }

    pub fn category(mut self, c: Category) -> Self {
        self.listing.category = c;
        self
    }

    pub fn descriptor(mut self, d: &str) -> Self {
        self.listing.descriptor = d.to_string();
        self
    }

    pub fn window(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.listing.window = ValidityWindow { from, to };
        self
    }

    pub fn tags(mut self, tags: Vec<&str>) -> Self {
        self.listing.skill_tags = tags.into_iter().map(String::from).collect();
        self
    }

    pub fn price(mut self, price: f64, kind: PriceKind) -> Self {
        self.listing.price = Some(price);
        self.listing.price_kind = Some(kind);
        self
    }

    pub fn build(self) -> NewListing {
        self.listing
    }
}

// ============================================================================
// MessageBuilder
// ============================================================================

pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    /// First message of a new thread.
    pub fn root(listing_id: &str, sender: &str, recipient: &str) -> Self {
        let id = id_gen::message_id();
        Self {
            message: Message {
                id: id.clone(),
                thread_id: id,
                sender_org_id: sender.to_string(),
                recipient_org_id: recipient.to_string(),
                listing_id: listing_id.to_string(),
                subject: "Interested".to_string(),
                body: "Is this still available?".to_string(),
                created_at: Utc::now(),
                read_at: None,
            },
        }
    }

    pub fn reply(root: &Message, sender: &str, recipient: &str) -> Self {
        Self {
            message: Message {
                id: id_gen::message_id(),
                thread_id: root.thread_id.clone(),
                sender_org_id: sender.to_string(),
                recipient_org_id: recipient.to_string(),
                listing_id: root.listing_id.clone(),
                subject: format!("Re: {}", root.subject),
                body: "Yes it is".to_string(),
                created_at: Utc::now(),
                read_at: None,
            },
        }
    }

    pub fn build(self) -> Message {
        self.message
    }
}

// ============================================================================
// RecordingSender
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Records every send; can be switched to fail.
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<SentMail>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl RecordingSender {
    pub fn failing() -> Self {
        let s = Self::default();
        s.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        s
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }
}

impl NotificationSender for RecordingSender {
    fn send(&self, to: &str, subject: &str, html_body: &str) -> ExchangeResult<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ExchangeError::Notification("mail relay down".into()));
        }
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            html: html_body.to_string(),
        });
        Ok(())
    }
}
