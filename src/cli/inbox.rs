use anyhow::Result;
use resource_exchange::constants::truncate_safe;
use resource_exchange::views;

use super::{open_engine, resolve_org};

pub fn list(user: Option<&str>) -> Result<()> {
    let engine = open_engine()?;
    let org = resolve_org(&engine, user)?;
    let entries = views::inbox_view(&engine, &org.id)?;

    if entries.is_empty() {
        println!("Inbox empty.");
        return Ok(());
    }
    println!("{:<2} {:<34}  {:<20}  {:<40}  {}", "", "MESSAGE", "FROM", "SUBJECT", "THREAD");
    for e in &entries {
        println!(
            "{:<2} {:<34}  {:<20}  {:<40}  {}",
            if e.message.is_unread() { "*" } else { "" },
            e.message.id,
            truncate_safe(&e.counterpart_label, 20),
            truncate_safe(&e.message.subject, 40),
            e.message.thread_id,
        );
    }
    println!("\n{} messages, {} unread", entries.len(), engine.unread_count(&org.id)?);
    Ok(())
}

pub fn read(user: Option<&str>, message_id: &str) -> Result<()> {
    let engine = open_engine()?;
    let org = resolve_org(&engine, user)?;
    if engine.mark_read(message_id, &org.id)? {
        println!("Marked read.");
    } else {
        println!("Already read.");
    }
    Ok(())
}
