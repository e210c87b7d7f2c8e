use anyhow::Result;
use chrono::NaiveDate;
use resource_exchange::constants::truncate_safe;
use resource_exchange::listing::{Category, Listing, NewListing, PriceKind, ValidityWindow};
use resource_exchange::views;

use super::{open_engine, resolve_org, short};

pub struct CreateArgs {
    pub category: Category,
    pub descriptor: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub location: String,
    pub contact: String,
    pub notes: Option<String>,
    pub tags: Vec<String>,
    pub price: Option<f64>,
    pub price_kind: Option<PriceKind>,
}

pub fn create(user: Option<&str>, args: CreateArgs) -> Result<()> {
    let engine = open_engine()?;
    let org = resolve_org(&engine, user)?;

    let mut new = NewListing::new(
        args.category,
        &args.descriptor,
        ValidityWindow::new(args.from, args.to)?,
        &args.location,
        &args.contact,
    );
    new.notes = args.notes.unwrap_or_default();
    new.skill_tags = args.tags;
    new.price = args.price;
    new.price_kind = args.price_kind;

    let listing = engine.create_listing(&org.id, new)?;
    println!("Created listing {} ({})", listing.id, listing.category.label());
    Ok(())
}

pub fn market(user: Option<&str>) -> Result<()> {
    let engine = open_engine()?;
    let org = resolve_org(&engine, user)?;
    let view = views::marketplace_view(&engine, &org.id)?;

    if view.is_empty() {
        println!("No open listings.");
        return Ok(());
    }
    for (category, entries) in &view {
        println!("== {} ({}) ==", category.label(), entries.len());
        for e in entries {
            let mine = if e.is_mine { " [mine]" } else { "" };
            println!(
                "  {:<10}  {:<32}  {} → {}  {:<14}  {}{}",
                short(&e.listing.id),
                truncate_safe(&e.listing.descriptor, 32),
                e.listing.window.from,
                e.listing.window.to,
                truncate_safe(&e.listing.location, 14),
                e.owner_handle,
                mine,
            );
            if !e.listing.skill_tags.is_empty() {
                println!("              tags: {}", e.listing.skill_tags.join(", "));
            }
        }
    }
    Ok(())
}

pub fn mine(user: Option<&str>) -> Result<()> {
    let engine = open_engine()?;
    let org = resolve_org(&engine, user)?;
    print_table(&engine.listings_by_owner(&org.id)?);
    Ok(())
}

pub fn reserved(user: Option<&str>) -> Result<()> {
    let engine = open_engine()?;
    let org = resolve_org(&engine, user)?;
    print_table(&engine.listings_by_reserver(&org.id)?);
    Ok(())
}

/// Pending requests on one of the caller's listings.
pub fn threads(user: Option<&str>, listing_id: &str) -> Result<()> {
    let engine = open_engine()?;
    let org = resolve_org(&engine, user)?;
    let roots = engine.threads_for_listing(listing_id, &org.id)?;
    if roots.is_empty() {
        println!("No threads on this listing.");
        return Ok(());
    }
    println!("{:<34}  {:<16}  {:<9}  {}", "THREAD", "FROM", "STATE", "OPENED");
    for root in &roots {
        let (label, _) = views::counterpart_label(&engine, root, &org.id)?;
        println!(
            "{:<34}  {:<16}  {:<9}  {}",
            root.thread_id,
            label,
            engine.negotiation_state(&root.thread_id)?.as_str(),
            root.created_at.format("%Y-%m-%d %H:%M"),
        );
    }
    Ok(())
}

fn print_table(listings: &[Listing]) {
    if listings.is_empty() {
        println!("No listings.");
        return;
    }
    println!(
        "{:<34}  {:<16}  {:<30}  {:<9}  {}",
        "ID", "CATEGORY", "DESCRIPTOR", "STATE", "WINDOW"
    );
    for l in listings {
        println!(
            "{:<34}  {:<16}  {:<30}  {:<9}  {} → {}",
            l.id,
            l.category.label(),
            truncate_safe(&l.descriptor, 30),
            l.state.as_str(),
            l.window.from,
            l.window.to,
        );
    }
    println!("\nTotal: {} listings", listings.len());
}
