use anyhow::Result;
use resource_exchange::views;

use super::{open_engine, resolve_org};

pub fn open(user: Option<&str>, listing_id: &str, body: &str) -> Result<()> {
    let engine = open_engine()?;
    let org = resolve_org(&engine, user)?;
    let msg = engine.open_thread(listing_id, &org.id, body)?;
    println!("Opened thread {}", msg.thread_id);
    println!("  Subject: {}", msg.subject);
    Ok(())
}

pub fn reply(user: Option<&str>, thread_id: &str, body: &str) -> Result<()> {
    let engine = open_engine()?;
    let org = resolve_org(&engine, user)?;
    let msg = engine.reply(thread_id, &org.id, body)?;
    println!("Sent {}", msg.id);
    Ok(())
}

/// Prints the thread and marks the caller's inbound messages read.
pub fn show(user: Option<&str>, thread_id: &str) -> Result<()> {
    let engine = open_engine()?;
    let org = resolve_org(&engine, user)?;
    let messages = engine.read_thread(thread_id, &org.id)?;
    let Some(root) = messages.first() else {
        println!("Empty thread.");
        return Ok(());
    };
    let (label, disclosed) = views::counterpart_label(&engine, root, &org.id)?;

    println!("{}", root.subject);
    println!(
        "With: {}{}  State: {}",
        label,
        if disclosed { " (contact disclosed)" } else { "" },
        engine.negotiation_state(thread_id)?,
    );
    println!("{}", "-".repeat(60));
    for m in &messages {
        let who = if m.sender_org_id == org.id { "you" } else { label.as_str() };
        println!("[{}] {}:", m.created_at.format("%Y-%m-%d %H:%M"), who);
        println!("  {}", m.body.replace('\n', "\n  "));
    }
    Ok(())
}

pub fn award(user: Option<&str>, thread_id: &str) -> Result<()> {
    let engine = open_engine()?;
    let org = resolve_org(&engine, user)?;
    let receipt = engine.award(thread_id, &org.id)?;

    if receipt.already_awarded {
        println!("Thread {} was already awarded.", thread_id);
    } else {
        println!("Listing {} reserved. Contact details are now shared.", receipt.listing_id);
        if !receipt.notified {
            println!("  (acceptance email could not be sent, see log)");
        }
    }
    if let Some(contact) = engine.counterpart_contact(thread_id, &org.id)? {
        println!("  {} <{}> {}", contact.company_name, contact.email, contact.phone);
    }
    Ok(())
}

pub fn state(user: Option<&str>, thread_id: &str) -> Result<()> {
    let engine = open_engine()?;
    let org = resolve_org(&engine, user)?;
    // Participants only
    engine.thread_messages(thread_id, &org.id)?;
    println!("{}", engine.negotiation_state(thread_id)?);
    Ok(())
}

pub fn contact(user: Option<&str>, thread_id: &str) -> Result<()> {
    let engine = open_engine()?;
    let org = resolve_org(&engine, user)?;
    match engine.counterpart_contact(thread_id, &org.id)? {
        Some(c) => {
            println!("Company: {}", c.company_name);
            println!("Email:   {}", c.email);
            println!("Phone:   {}", c.phone);
            println!("Address: {}", c.address);
        }
        None => println!("Contact details are shared once the listing owner accepts."),
    }
    Ok(())
}
