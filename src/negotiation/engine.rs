//! Negotiation Engine: threads, replies, read-marking and the award.
//!
//! One engine per organization session, each with its own SQLite connection.
//! Sessions share a [`NotificationRelay`] and a notification sender.
//!
//! The award is the only operation touching several stores at once. It runs
//! in one IMMEDIATE transaction whose commit point is the atomic reservation:
//!
//!   BEGIN IMMEDIATE
//!     mark triggering message read
//!     reserve listing (CAS on state = 'open')   -- Conflict → rollback,
//!                                               unless this pair holds it
//!     grant disclosure
//!   COMMIT
//!   publish relay events, send acceptance email (best-effort)

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;

use super::state::NegotiationState;
use crate::constants::MAX_MESSAGE_BODY_BYTES;
use crate::error::VoidReason;
use crate::id_gen;
use crate::listing::{Listing, NewListing, ReservationState};
use crate::message::Message;
use crate::notify::{self, NotificationSender};
use crate::organization::{ContactRecord, Organization};
use crate::relay::{ChangeEvent, NotificationRelay, Subscription};
use crate::storage::disclosures::DisclosureLedger;
use crate::storage::listings::{ListingStore, ReserveOutcome};
use crate::storage::messages::MessageStore;
use crate::storage::organizations::{OrganizationDirectory, Registration};
use crate::time_utils;
use crate::{ExchangeError, ExchangeResult};

/// Source of "now" for validity-window checks and timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Outcome of a successful award.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AwardReceipt {
    pub thread_id: String,
    pub listing_id: String,
    pub counterpart_org_id: String,
    /// True when the thread had already won; nothing was mutated.
    pub already_awarded: bool,
    /// Acceptance email accepted by the sender.
    pub notified: bool,
}

pub struct NegotiationEngine {
    conn: Connection,
    relay: Arc<NotificationRelay>,
    notifier: Arc<dyn NotificationSender>,
    clock: Clock,
}

fn validate_body(body: &str) -> ExchangeResult<String> {
    let body = body.trim();
    if body.is_empty() {
        return Err(ExchangeError::Validation("message body is required".into()));
    }
    if body.len() > MAX_MESSAGE_BODY_BYTES {
        return Err(ExchangeError::Validation(format!(
            "message body exceeds {} bytes",
            MAX_MESSAGE_BODY_BYTES
        )));
    }
    Ok(body.to_string())
}

impl NegotiationEngine {
    pub fn new(conn: Connection, relay: Arc<NotificationRelay>, notifier: Arc<dyn NotificationSender>) -> Self {
        Self {
            conn,
            relay,
            notifier,
            clock: Arc::new(time_utils::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Live session for `org_id` on the shared relay.
    pub fn subscribe(&self, org_id: &str) -> Subscription {
        self.relay.subscribe(org_id)
    }

    // ── Organizations ──

    /// Registers the user's organization and mails the verification code.
    /// A mail failure is logged; the registration stands.
    pub fn register_organization(&self, user_id: &str, contact: &ContactRecord) -> ExchangeResult<Registration> {
        let reg = OrganizationDirectory::register(&self.conn, user_id, contact)?;
        let (subject, html) = notify::verification_email(&reg.organization.handle, &reg.verification_code);
        if let Err(e) = self.notifier.send(contact.email.trim(), &subject, &html) {
            tracing::warn!(org_id = %reg.organization.id, error = %e, "Verification email failed");
        }
        Ok(reg)
    }

    pub fn verify_organization(&self, org_id: &str, code: &str) -> ExchangeResult<bool> {
        OrganizationDirectory::verify(&self.conn, org_id, code)
    }

    pub fn resolve_user(&self, user_id: &str) -> ExchangeResult<Option<Organization>> {
        OrganizationDirectory::resolve_user(&self.conn, user_id)
    }

    // ── Listings ──

    pub fn create_listing(&self, owner_org_id: &str, new: NewListing) -> ExchangeResult<Listing> {
        let listing = ListingStore::create(&self.conn, owner_org_id, new)?;
        self.relay
            .publish(ChangeEvent::listing(&listing.id, vec![owner_org_id.to_string()], true));
        Ok(listing)
    }

    pub fn marketplace(&self) -> ExchangeResult<Vec<Listing>> {
        ListingStore::list_open_for_marketplace(&self.conn, self.now())
    }

    pub fn listings_by_owner(&self, org_id: &str) -> ExchangeResult<Vec<Listing>> {
        ListingStore::list_by_owner(&self.conn, org_id)
    }

    pub fn listings_by_reserver(&self, org_id: &str) -> ExchangeResult<Vec<Listing>> {
        ListingStore::list_by_reserver(&self.conn, org_id)
    }

    // ── Threads ──

    /// Uninitiated → Open: first message from `from_org_id` to the listing owner.
    pub fn open_thread(&self, listing_id: &str, from_org_id: &str, body: &str) -> ExchangeResult<Message> {
        let listing = ListingStore::require(&self.conn, listing_id)?;
        if listing.is_owned_by(from_org_id) {
            return Err(ExchangeError::SelfContact(from_org_id.to_string()));
        }
        OrganizationDirectory::require(&self.conn, from_org_id)?;
        let body = validate_body(body)?;

        if MessageStore::find_thread(&self.conn, listing_id, from_org_id)?.is_some() {
            return Err(ExchangeError::DuplicateThread {
                listing_id: listing_id.to_string(),
                org_id: from_org_id.to_string(),
            });
        }
        let now = self.now();
        if listing.state != ReservationState::Open {
            return Err(ExchangeError::AlreadyReserved(listing_id.to_string()));
        }
        if listing.window.has_elapsed(now) {
            return Err(ExchangeError::ListingExpired(listing_id.to_string()));
        }

        let id = id_gen::message_id();
        let msg = Message {
            id: id.clone(),
            thread_id: id,
            sender_org_id: from_org_id.to_string(),
            recipient_org_id: listing.owner_org_id.clone(),
            listing_id: listing.id.clone(),
            subject: format!("Interested in {}: {}", listing.category.label(), listing.descriptor),
            body,
            created_at: now,
            read_at: None,
        };
        // The unique root index catches a concurrent duplicate
        MessageStore::insert(&self.conn, &msg)?;

        tracing::info!(
            thread_id = %msg.thread_id,
            listing_id = %listing.id,
            from = %from_org_id,
            "Thread opened"
        );
        self.relay.publish(ChangeEvent::message(
            &listing.id,
            &msg.thread_id,
            vec![from_org_id.to_string(), listing.owner_org_id],
        ));
        Ok(msg)
    }

    pub fn reply(&self, thread_id: &str, from_org_id: &str, body: &str) -> ExchangeResult<Message> {
        let root = self.participant_root(thread_id, from_org_id)?;
        let body = validate_body(body)?;
        let listing = ListingStore::require(&self.conn, &root.listing_id)?;

        let state = NegotiationState::derive(&listing, &root.sender_org_id, self.now());
        if let Some(reason) = state.void_reason() {
            return Err(ExchangeError::ThreadVoid {
                thread_id: thread_id.to_string(),
                reason,
            });
        }

        let recipient = root
            .counterpart_of(from_org_id)
            .map(String::from)
            .ok_or_else(|| ExchangeError::NotParticipant {
                thread_id: thread_id.to_string(),
                org_id: from_org_id.to_string(),
            })?;

        let msg = Message {
            id: id_gen::message_id(),
            thread_id: root.thread_id.clone(),
            sender_org_id: from_org_id.to_string(),
            recipient_org_id: recipient.clone(),
            listing_id: root.listing_id.clone(),
            subject: format!("Re: {}", root.subject),
            body,
            created_at: self.now(),
            read_at: None,
        };
        MessageStore::insert(&self.conn, &msg)?;

        tracing::debug!(thread_id = %thread_id, from = %from_org_id, "Reply appended");
        self.relay.publish(ChangeEvent::message(
            &msg.listing_id,
            thread_id,
            vec![from_org_id.to_string(), recipient],
        ));
        Ok(msg)
    }

    /// Sets the read timestamp once. Only the recipient may mark a message.
    /// Returns false if it was already read.
    pub fn mark_read(&self, message_id: &str, reader_org_id: &str) -> ExchangeResult<bool> {
        let msg = MessageStore::get(&self.conn, message_id)?
            .ok_or_else(|| ExchangeError::MessageNotFound(message_id.to_string()))?;
        if msg.recipient_org_id != reader_org_id {
            return Err(ExchangeError::Forbidden(format!(
                "only the recipient may mark message {} as read",
                message_id
            )));
        }
        let changed = MessageStore::mark_read(&self.conn, message_id, self.now())?;
        if changed {
            self.relay.publish(ChangeEvent::message(
                &msg.listing_id,
                &msg.thread_id,
                vec![msg.sender_org_id.clone(), msg.recipient_org_id.clone()],
            ));
        }
        Ok(changed)
    }

    /// Owner accepts this thread's counterpart: reserve + disclose.
    pub fn award(&self, thread_id: &str, awarding_org_id: &str) -> ExchangeResult<AwardReceipt> {
        let root = MessageStore::thread_root(&self.conn, thread_id)?
            .ok_or_else(|| ExchangeError::ThreadNotFound(thread_id.to_string()))?;
        let listing = ListingStore::require(&self.conn, &root.listing_id)?;
        if !listing.is_owned_by(awarding_org_id) {
            return Err(ExchangeError::Forbidden(format!(
                "only the listing owner may award thread {}",
                thread_id
            )));
        }
        // Thread roots always come from the non-owner side
        let counterpart = root.sender_org_id.clone();
        let mut receipt = AwardReceipt {
            thread_id: thread_id.to_string(),
            listing_id: listing.id.clone(),
            counterpart_org_id: counterpart.clone(),
            already_awarded: false,
            notified: false,
        };

        match NegotiationState::derive(&listing, &counterpart, self.now()) {
            NegotiationState::Awarded => {
                // Retry of a completed award; repairs nothing if the grant exists
                DisclosureLedger::grant(&self.conn, thread_id, awarding_org_id, &counterpart)?;
                receipt.already_awarded = true;
                return Ok(receipt);
            }
            NegotiationState::Void => return Err(ExchangeError::AlreadyReserved(listing.id)),
            NegotiationState::Expired => {
                return Err(ExchangeError::ThreadVoid {
                    thread_id: thread_id.to_string(),
                    reason: VoidReason::Expired,
                })
            }
            NegotiationState::Open => {}
        }

        {
            let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
                .map_err(|e| ExchangeError::storage("Begin award failed", e))?;

            if let Some(trigger) = MessageStore::latest_inbound(&tx, thread_id, awarding_org_id)? {
                MessageStore::mark_read(&tx, &trigger.id, self.now())?;
            }
            if let ReserveOutcome::Conflict = ListingStore::reserve(&tx, &listing.id, &counterpart)? {
                // A concurrent award of this same thread committed first
                let current = ListingStore::require(&tx, &listing.id)?;
                if current.reserved_by.as_deref() != Some(counterpart.as_str()) {
                    // tx dropped → rollback of the read-mark
                    return Err(ExchangeError::AlreadyReserved(listing.id));
                }
                DisclosureLedger::grant(&tx, thread_id, awarding_org_id, &counterpart)?;
                tx.commit().map_err(|e| ExchangeError::storage("Commit award failed", e))?;
                receipt.already_awarded = true;
                return Ok(receipt);
            }
            DisclosureLedger::grant(&tx, thread_id, awarding_org_id, &counterpart)?;

            tx.commit().map_err(|e| ExchangeError::storage("Commit award failed", e))?;
        }

        tracing::info!(
            thread_id = %thread_id,
            listing_id = %listing.id,
            counterpart = %counterpart,
            "Listing awarded"
        );

        // Losing initiators learn their threads went void
        let mut audience = vec![awarding_org_id.to_string()];
        audience.extend(
            MessageStore::thread_roots_for_listing(&self.conn, &listing.id)?
                .into_iter()
                .map(|m| m.sender_org_id),
        );
        self.relay.publish(ChangeEvent::listing(&listing.id, audience, true));
        self.relay.publish(ChangeEvent::disclosure(
            &listing.id,
            thread_id,
            vec![awarding_org_id.to_string(), counterpart.clone()],
        ));

        receipt.notified = self.send_acceptance(thread_id, awarding_org_id, &counterpart, &listing);
        Ok(receipt)
    }

    fn send_acceptance(&self, thread_id: &str, owner_org_id: &str, counterpart: &str, listing: &Listing) -> bool {
        // Both records come through the ledger: each side as seen by the other
        let lookup = |viewer: &str| DisclosureLedger::counterpart_real_contact(&self.conn, thread_id, viewer);
        let (to, owner) = match (lookup(owner_org_id), lookup(counterpart)) {
            (Ok(Some(to)), Ok(Some(owner))) => (to, owner),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(thread_id = %thread_id, error = %e, "Acceptance email skipped");
                return false;
            }
            _ => return false,
        };

        let (subject, html) = notify::acceptance_email(&listing.descriptor, &owner);
        match self.notifier.send(&to.email, &subject, &html) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(thread_id = %thread_id, error = %e, "Acceptance email failed");
                false
            }
        }
    }

    // ── Reads ──

    /// Whole thread, oldest first. Readable in every state.
    pub fn thread_messages(&self, thread_id: &str, viewer_org_id: &str) -> ExchangeResult<Vec<Message>> {
        self.participant_root(thread_id, viewer_org_id)?;
        MessageStore::thread_messages(&self.conn, thread_id)
    }

    /// Opens the thread: marks every unread message addressed to the viewer.
    pub fn read_thread(&self, thread_id: &str, viewer_org_id: &str) -> ExchangeResult<Vec<Message>> {
        let root = self.participant_root(thread_id, viewer_org_id)?;
        let marked = MessageStore::mark_thread_read(&self.conn, thread_id, viewer_org_id, self.now())?;
        if marked > 0 {
            self.relay.publish(ChangeEvent::message(
                &root.listing_id,
                thread_id,
                vec![root.sender_org_id.clone(), root.recipient_org_id.clone()],
            ));
        }
        MessageStore::thread_messages(&self.conn, thread_id)
    }

    pub fn inbox(&self, org_id: &str) -> ExchangeResult<Vec<Message>> {
        MessageStore::inbox(&self.conn, org_id)
    }

    pub fn unread_count(&self, org_id: &str) -> ExchangeResult<usize> {
        MessageStore::unread_count(&self.conn, org_id)
    }

    /// Thread roots on a listing. Owner only.
    pub fn threads_for_listing(&self, listing_id: &str, owner_org_id: &str) -> ExchangeResult<Vec<Message>> {
        let listing = ListingStore::require(&self.conn, listing_id)?;
        if !listing.is_owned_by(owner_org_id) {
            return Err(ExchangeError::Forbidden(format!(
                "only the owner may list threads of {}",
                listing_id
            )));
        }
        MessageStore::thread_roots_for_listing(&self.conn, listing_id)
    }

    pub fn negotiation_state(&self, thread_id: &str) -> ExchangeResult<NegotiationState> {
        let root = MessageStore::thread_root(&self.conn, thread_id)?
            .ok_or_else(|| ExchangeError::ThreadNotFound(thread_id.to_string()))?;
        let listing = ListingStore::require(&self.conn, &root.listing_id)?;
        Ok(NegotiationState::derive(&listing, &root.sender_org_id, self.now()))
    }

    /// Counterpart's real contact, once the thread's grant exists.
    pub fn counterpart_contact(&self, thread_id: &str, viewer_org_id: &str) -> ExchangeResult<Option<ContactRecord>> {
        self.participant_root(thread_id, viewer_org_id)?;
        DisclosureLedger::counterpart_real_contact(&self.conn, thread_id, viewer_org_id)
    }

    fn participant_root(&self, thread_id: &str, org_id: &str) -> ExchangeResult<Message> {
        let root = MessageStore::thread_root(&self.conn, thread_id)?
            .ok_or_else(|| ExchangeError::ThreadNotFound(thread_id.to_string()))?;
        if !root.involves(org_id) {
            return Err(ExchangeError::NotParticipant {
                thread_id: thread_id.to_string(),
                org_id: org_id.to_string(),
            });
        }
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::{open_connection, ConnectionRole};
    use crate::storage::migrations::migrate_exchange_db;
    use crate::test_helpers::{at, contact, date, setup_exchange_db, ManualClock, NewListingBuilder, RecordingSender};

    struct Fixture {
        engine: NegotiationEngine,
        relay: Arc<NotificationRelay>,
        sender: Arc<RecordingSender>,
        clock: ManualClock,
        a: Organization,
        b: Organization,
        c: Organization,
        listing: Listing,
    }

    fn fixture() -> Fixture {
        let relay = NotificationRelay::shared(64);
        let sender = Arc::new(RecordingSender::default());
        let clock = ManualClock::new(at(2024, 6, 10));
        let engine = NegotiationEngine::new(setup_exchange_db(), relay.clone(), sender.clone())
            .with_clock(clock.clock());

        let a = engine.register_organization("user-a", &contact("Alpha Build")).unwrap().organization;
        let b = engine.register_organization("user-b", &contact("Beta Crew")).unwrap().organization;
        let c = engine.register_organization("user-c", &contact("Gamma Tools")).unwrap().organization;
        let listing = engine
            .create_listing(
                &a.id,
                NewListingBuilder::new().window(date(2024, 6, 1), date(2024, 6, 30)).build(),
            )
            .unwrap();

        Fixture { engine, relay, sender, clock, a, b, c, listing }
    }

    fn acceptance_mails(sender: &RecordingSender) -> usize {
        sender
            .sent()
            .iter()
            .filter(|m| m.subject.starts_with("Your request was accepted"))
            .count()
    }

    #[test]
    fn test_award_scenario() {
        let f = fixture();
        let e = &f.engine;

        let t1 = e.open_thread(&f.listing.id, &f.b.id, "We can staff this").unwrap();
        assert_eq!(ListingStore::require(e.conn(), &f.listing.id).unwrap().state, ReservationState::Open);
        let t2 = e.open_thread(&f.listing.id, &f.c.id, "Us too").unwrap();

        let receipt = e.award(&t1.thread_id, &f.a.id).unwrap();
        assert!(!receipt.already_awarded);
        assert!(receipt.notified);
        let listing = ListingStore::require(e.conn(), &f.listing.id).unwrap();
        assert_eq!(listing.state, ReservationState::Reserved);
        assert_eq!(listing.reserved_by.as_deref(), Some(f.b.id.as_str()));
        assert!(DisclosureLedger::is_disclosed(e.conn(), &t1.thread_id, &f.a.id).unwrap());

        assert!(matches!(
            e.award(&t2.thread_id, &f.a.id),
            Err(ExchangeError::AlreadyReserved(_))
        ));
        assert!(DisclosureLedger::get(e.conn(), &t2.thread_id).unwrap().is_none());

        assert!(matches!(
            e.reply(&t2.thread_id, &f.c.id, "Still keen"),
            Err(ExchangeError::ThreadVoid { reason: VoidReason::ReservedElsewhere, .. })
        ));

        let seen_by_b = e.counterpart_contact(&t1.thread_id, &f.b.id).unwrap().unwrap();
        assert_eq!(seen_by_b.company_name, "Alpha Build");
        let seen_by_a = e.counterpart_contact(&t1.thread_id, &f.a.id).unwrap().unwrap();
        assert_eq!(seen_by_a.company_name, "Beta Crew");
        assert!(e.counterpart_contact(&t2.thread_id, &f.c.id).unwrap().is_none());

        // Loser history stays readable
        assert_eq!(e.thread_messages(&t2.thread_id, &f.c.id).unwrap().len(), 1);
        assert_eq!(e.negotiation_state(&t1.thread_id).unwrap(), NegotiationState::Awarded);
        assert_eq!(e.negotiation_state(&t2.thread_id).unwrap(), NegotiationState::Void);
    }

    #[test]
    fn test_acceptance_email_goes_to_counterpart_with_owner_contact() {
        let f = fixture();
        let t1 = f.engine.open_thread(&f.listing.id, &f.b.id, "Hello").unwrap();
        f.engine.award(&t1.thread_id, &f.a.id).unwrap();

        let mail = f
            .sender
            .sent()
            .into_iter()
            .find(|m| m.subject.starts_with("Your request was accepted"))
            .unwrap();
        assert_eq!(mail.to, contact("Beta Crew").email);
        assert!(mail.html.contains("Alpha Build"));
    }

    #[test]
    fn test_duplicate_thread_and_participants() {
        let f = fixture();
        let e = &f.engine;
        let t = e.open_thread(&f.listing.id, &f.b.id, "Hi").unwrap();

        assert!(matches!(
            e.open_thread(&f.listing.id, &f.b.id, "Hi again"),
            Err(ExchangeError::DuplicateThread { .. })
        ));

        let r1 = e.reply(&t.thread_id, &f.a.id, "Sure").unwrap();
        assert_eq!(r1.recipient_org_id, f.b.id);
        let r2 = e.reply(&t.thread_id, &f.b.id, "Great").unwrap();
        assert_eq!(r2.recipient_org_id, f.a.id);
        assert!(matches!(
            e.reply(&t.thread_id, &f.c.id, "Me?"),
            Err(ExchangeError::NotParticipant { .. })
        ));
        assert!(matches!(
            e.thread_messages(&t.thread_id, &f.c.id),
            Err(ExchangeError::NotParticipant { .. })
        ));

        let thread = e.thread_messages(&t.thread_id, &f.b.id).unwrap();
        assert_eq!(thread.len(), 3);
        assert!(thread.iter().all(|m| m.thread_id == t.thread_id && m.listing_id == f.listing.id));
    }

    #[test]
    fn test_subjects() {
        let f = fixture();
        let t = f.engine.open_thread(&f.listing.id, &f.b.id, "Hi").unwrap();
        assert_eq!(t.subject, "Interested in available staff: Electrician");
        let r = f.engine.reply(&t.thread_id, &f.a.id, "Yes").unwrap();
        assert_eq!(r.subject, "Re: Interested in available staff: Electrician");
    }

    #[test]
    fn test_open_thread_rejections() {
        let f = fixture();
        let e = &f.engine;

        assert!(matches!(
            e.open_thread(&f.listing.id, &f.a.id, "Mine"),
            Err(ExchangeError::SelfContact(_))
        ));
        assert!(matches!(
            e.open_thread("missing", &f.b.id, "Hi"),
            Err(ExchangeError::ListingNotFound(_))
        ));
        assert!(matches!(
            e.open_thread(&f.listing.id, "ghost", "Hi"),
            Err(ExchangeError::OrganizationNotFound(_))
        ));
        assert!(matches!(
            e.open_thread(&f.listing.id, &f.b.id, "   "),
            Err(ExchangeError::Validation(_))
        ));

        let t = e.open_thread(&f.listing.id, &f.b.id, "Hi").unwrap();
        e.award(&t.thread_id, &f.a.id).unwrap();
        assert!(matches!(
            e.open_thread(&f.listing.id, &f.c.id, "Late"),
            Err(ExchangeError::AlreadyReserved(_))
        ));
    }

    #[test]
    fn test_only_owner_awards() {
        let f = fixture();
        let t = f.engine.open_thread(&f.listing.id, &f.b.id, "Hi").unwrap();
        assert!(matches!(
            f.engine.award(&t.thread_id, &f.b.id),
            Err(ExchangeError::Forbidden(_))
        ));
        assert!(matches!(
            f.engine.award("missing", &f.a.id),
            Err(ExchangeError::ThreadNotFound(_))
        ));
        assert_eq!(f.engine.negotiation_state(&t.thread_id).unwrap(), NegotiationState::Open);
    }

    #[test]
    fn test_award_marks_trigger_read() {
        let f = fixture();
        let e = &f.engine;
        let t = e.open_thread(&f.listing.id, &f.b.id, "Hi").unwrap();
        e.reply(&t.thread_id, &f.a.id, "Tell me more").unwrap();
        let latest = e.reply(&t.thread_id, &f.b.id, "Two people, all month").unwrap();

        e.award(&t.thread_id, &f.a.id).unwrap();
        let stored = MessageStore::get(e.conn(), &latest.id).unwrap().unwrap();
        assert!(stored.read_at.is_some());
        // Only the triggering message
        assert!(MessageStore::get(e.conn(), &t.id).unwrap().unwrap().read_at.is_none());
    }

    #[test]
    fn test_lost_award_leaves_no_trace() {
        let f = fixture();
        let e = &f.engine;
        let t1 = e.open_thread(&f.listing.id, &f.b.id, "Hi").unwrap();
        let t2 = e.open_thread(&f.listing.id, &f.c.id, "Hi").unwrap();

        // Another session won first
        ListingStore::reserve(e.conn(), &f.listing.id, &f.b.id).unwrap();
        DisclosureLedger::grant(e.conn(), &t1.thread_id, &f.a.id, &f.b.id).unwrap();

        assert!(matches!(
            e.award(&t2.thread_id, &f.a.id),
            Err(ExchangeError::AlreadyReserved(_))
        ));
        assert!(DisclosureLedger::get(e.conn(), &t2.thread_id).unwrap().is_none());
        assert!(MessageStore::get(e.conn(), &t2.id).unwrap().unwrap().read_at.is_none());
        assert_eq!(acceptance_mails(&f.sender), 0);
    }

    #[test]
    fn test_award_retry_is_idempotent() {
        let f = fixture();
        let t = f.engine.open_thread(&f.listing.id, &f.b.id, "Hi").unwrap();
        let first = f.engine.award(&t.thread_id, &f.a.id).unwrap();
        let again = f.engine.award(&t.thread_id, &f.a.id).unwrap();

        assert!(!first.already_awarded);
        assert!(again.already_awarded);
        assert_eq!(again.counterpart_org_id, f.b.id);
        assert_eq!(acceptance_mails(&f.sender), 1);
        assert_eq!(DisclosureLedger::threads_disclosed_to(f.engine.conn(), &f.b.id).unwrap().len(), 1);
    }

    #[test]
    fn test_mail_failure_keeps_award() {
        let relay = NotificationRelay::shared(8);
        let sender = Arc::new(RecordingSender::failing());
        let engine = NegotiationEngine::new(setup_exchange_db(), relay, sender)
            .with_clock(ManualClock::new(at(2024, 6, 10)).clock());
        // Registration survives the failed verification email too
        let a = engine.register_organization("user-a", &contact("Alpha")).unwrap().organization;
        let b = engine.register_organization("user-b", &contact("Beta")).unwrap().organization;
        let listing = engine.create_listing(&a.id, NewListingBuilder::new().build()).unwrap();
        let t = engine.open_thread(&listing.id, &b.id, "Hi").unwrap();

        let receipt = engine.award(&t.thread_id, &a.id).unwrap();
        assert!(!receipt.notified);
        assert_eq!(engine.negotiation_state(&t.thread_id).unwrap(), NegotiationState::Awarded);
        assert!(engine.counterpart_contact(&t.thread_id, &b.id).unwrap().is_some());
    }

    #[test]
    fn test_expired_listing_voids_open_threads() {
        let f = fixture();
        let e = &f.engine;
        let t = e.open_thread(&f.listing.id, &f.b.id, "Hi").unwrap();

        f.clock.set(at(2024, 7, 1));
        assert!(e.marketplace().unwrap().is_empty());
        assert_eq!(e.negotiation_state(&t.thread_id).unwrap(), NegotiationState::Expired);
        assert!(matches!(
            e.reply(&t.thread_id, &f.a.id, "Sorry, late"),
            Err(ExchangeError::ThreadVoid { reason: VoidReason::Expired, .. })
        ));
        assert!(matches!(
            e.award(&t.thread_id, &f.a.id),
            Err(ExchangeError::ThreadVoid { reason: VoidReason::Expired, .. })
        ));
        assert!(matches!(
            e.open_thread(&f.listing.id, &f.c.id, "Hi"),
            Err(ExchangeError::ListingExpired(_))
        ));

        // Not mutated, still readable
        let listing = ListingStore::require(e.conn(), &f.listing.id).unwrap();
        assert_eq!(listing.state, ReservationState::Open);
        assert_eq!(e.thread_messages(&t.thread_id, &f.b.id).unwrap().len(), 1);
    }

    #[test]
    fn test_marketplace_round_trip() {
        let f = fixture();
        let market = f.engine.marketplace().unwrap();
        assert_eq!(market.iter().filter(|l| l.id == f.listing.id).count(), 1);
        f.clock.set(at(2024, 6, 30));
        assert!(f.engine.marketplace().unwrap().is_empty());
    }

    #[test]
    fn test_mark_read_rules() {
        let f = fixture();
        let e = &f.engine;
        let t = e.open_thread(&f.listing.id, &f.b.id, "Hi").unwrap();

        assert!(matches!(e.mark_read(&t.id, &f.b.id), Err(ExchangeError::Forbidden(_))));
        assert!(matches!(e.mark_read("missing", &f.a.id), Err(ExchangeError::MessageNotFound(_))));
        assert_eq!(e.unread_count(&f.a.id).unwrap(), 1);
        assert!(e.mark_read(&t.id, &f.a.id).unwrap());
        assert!(!e.mark_read(&t.id, &f.a.id).unwrap());
        assert_eq!(e.unread_count(&f.a.id).unwrap(), 0);
    }

    #[test]
    fn test_read_thread_marks_only_viewer_inbound() {
        let f = fixture();
        let e = &f.engine;
        let t = e.open_thread(&f.listing.id, &f.b.id, "Hi").unwrap();
        e.reply(&t.thread_id, &f.b.id, "Anyone?").unwrap();
        e.reply(&t.thread_id, &f.a.id, "Here").unwrap();

        let msgs = e.read_thread(&t.thread_id, &f.a.id).unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(e.unread_count(&f.a.id).unwrap(), 0);
        assert_eq!(e.unread_count(&f.b.id).unwrap(), 1);
        assert_eq!(e.inbox(&f.a.id).unwrap().len(), 2);
    }

    #[test]
    fn test_read_updates_reach_the_sender() {
        let f = fixture();
        let e = &f.engine;
        let t = e.open_thread(&f.listing.id, &f.b.id, "Hi").unwrap();

        let b_session = e.subscribe(&f.b.id);
        assert!(e.mark_read(&t.id, &f.a.id).unwrap());
        let ev = b_session.try_next().unwrap();
        assert_eq!(ev.kind, crate::relay::EntityKind::Message);
        assert_eq!(ev.thread_id.as_deref(), Some(t.thread_id.as_str()));

        e.reply(&t.thread_id, &f.a.id, "Still open").unwrap();
        let a_session = e.subscribe(&f.a.id);
        e.read_thread(&t.thread_id, &f.b.id).unwrap();
        assert!(a_session.drain());
    }

    #[test]
    fn test_threads_for_listing_owner_only() {
        let f = fixture();
        f.engine.open_thread(&f.listing.id, &f.b.id, "Hi").unwrap();
        f.engine.open_thread(&f.listing.id, &f.c.id, "Hi").unwrap();
        assert_eq!(f.engine.threads_for_listing(&f.listing.id, &f.a.id).unwrap().len(), 2);
        assert!(matches!(
            f.engine.threads_for_listing(&f.listing.id, &f.b.id),
            Err(ExchangeError::Forbidden(_))
        ));
    }

    #[test]
    fn test_relay_signals_sessions() {
        let f = fixture();
        let a_session = f.engine.subscribe(&f.a.id);
        let b_session = f.engine.subscribe(&f.b.id);
        let c_session = f.engine.subscribe(&f.c.id);

        let t = f.engine.open_thread(&f.listing.id, &f.b.id, "Hi").unwrap();
        assert!(a_session.drain());
        assert!(b_session.drain());
        assert!(!c_session.drain());

        let t2 = f.engine.open_thread(&f.listing.id, &f.c.id, "Hi").unwrap();
        assert!(c_session.drain());
        a_session.drain();

        f.engine.award(&t.thread_id, &f.a.id).unwrap();
        let mut kinds = vec![];
        while let Some(ev) = b_session.try_next() {
            kinds.push(ev.kind);
        }
        assert!(kinds.contains(&crate::relay::EntityKind::Listing));
        assert!(kinds.contains(&crate::relay::EntityKind::Disclosure));
        // The loser refreshes and finds its thread void
        assert!(c_session.drain());
        assert_eq!(f.engine.negotiation_state(&t2.thread_id).unwrap(), NegotiationState::Void);
        assert!(f.relay.stats().delivered > 0);
    }

    #[test]
    fn test_verification_code_round_trip() {
        let relay = NotificationRelay::shared(8);
        let sender = Arc::new(RecordingSender::default());
        let engine = NegotiationEngine::new(setup_exchange_db(), relay, sender.clone());
        let reg = engine.register_organization("user-a", &contact("Alpha")).unwrap();

        let mail = sender.sent().pop().unwrap();
        assert_eq!(mail.to, contact("Alpha").email);
        assert!(mail.html.contains(&reg.verification_code));
        assert!(!engine.verify_organization(&reg.organization.id, "WRONG1").unwrap());
        assert!(engine.verify_organization(&reg.organization.id, &reg.verification_code).unwrap());
        assert!(engine.resolve_user("user-a").unwrap().unwrap().verified);
    }

    #[test]
    fn test_concurrent_awards_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("exchange.db");
        let relay = NotificationRelay::shared(64);
        let sender = Arc::new(RecordingSender::default());
        let clock = ManualClock::new(at(2024, 6, 10));

        let open = || {
            let conn = open_connection(&db, ConnectionRole::Session).unwrap();
            migrate_exchange_db(&conn).unwrap();
            NegotiationEngine::new(conn, relay.clone(), sender.clone()).with_clock(clock.clock())
        };

        let setup = open();
        let owner = setup.register_organization("owner", &contact("Owner")).unwrap().organization;
        let listing = setup.create_listing(&owner.id, NewListingBuilder::new().build()).unwrap();
        let mut threads = vec![];
        for i in 0..6 {
            let org = setup
                .register_organization(&format!("bidder-{}", i), &contact(&format!("Bidder {}", i)))
                .unwrap()
                .organization;
            threads.push(setup.open_thread(&listing.id, &org.id, "Pick us").unwrap().thread_id);
        }

        let results: Vec<ExchangeResult<AwardReceipt>> = std::thread::scope(|s| {
            let handles: Vec<_> = threads
                .iter()
                .map(|t| {
                    let engine = open();
                    let owner_id = owner.id.clone();
                    s.spawn(move || engine.award(t, &owner_id))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, ExchangeError::AlreadyReserved(_))));
        let granted: usize = threads
            .iter()
            .filter(|t| DisclosureLedger::get(setup.conn(), t).unwrap().is_some())
            .count();
        assert_eq!(granted, 1);
    }

    #[test]
    fn test_concurrent_awards_of_one_thread_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("exchange.db");
        let relay = NotificationRelay::shared(64);
        let sender = Arc::new(RecordingSender::default());
        let clock = ManualClock::new(at(2024, 6, 10));

        let open = || {
            let conn = open_connection(&db, ConnectionRole::Session).unwrap();
            migrate_exchange_db(&conn).unwrap();
            NegotiationEngine::new(conn, relay.clone(), sender.clone()).with_clock(clock.clock())
        };

        let setup = open();
        let owner = setup.register_organization("owner", &contact("Owner")).unwrap().organization;
        let bidder = setup.register_organization("bidder", &contact("Bidder")).unwrap().organization;
        let listing = setup.create_listing(&owner.id, NewListingBuilder::new().build()).unwrap();
        let thread_id = setup.open_thread(&listing.id, &bidder.id, "Pick us").unwrap().thread_id;

        let results: Vec<ExchangeResult<AwardReceipt>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let engine = open();
                    let (t, owner_id) = (thread_id.clone(), owner.id.clone());
                    s.spawn(move || engine.award(&t, &owner_id))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let receipts: Vec<AwardReceipt> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(receipts.iter().filter(|r| !r.already_awarded).count(), 1);
        assert!(receipts.iter().all(|r| r.counterpart_org_id == bidder.id));
        assert_eq!(setup.negotiation_state(&thread_id).unwrap(), NegotiationState::Awarded);
        assert!(DisclosureLedger::get(setup.conn(), &thread_id).unwrap().is_some());
        assert_eq!(acceptance_mails(&sender), 1);
    }
}
