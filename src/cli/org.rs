use anyhow::{bail, Result};
use resource_exchange::organization::ContactRecord;
use resource_exchange::storage::organizations::OrganizationDirectory;

use super::{open_engine, resolve_org};

pub fn register(user: Option<&str>, company: &str, email: &str, phone: &str, address: &str) -> Result<()> {
    let Some(user) = user else {
        bail!("--user is required to register an organization");
    };
    let engine = open_engine()?;
    let reg = engine.register_organization(user, &ContactRecord::new(company, email, phone, address))?;

    println!("Registered organization {}", reg.organization.id);
    println!("  Handle: {}", reg.organization.handle);
    println!("  A verification code was sent to {}", email.trim());
    Ok(())
}

pub fn show(user: Option<&str>) -> Result<()> {
    let engine = open_engine()?;
    let org = resolve_org(&engine, user)?;
    let contact = OrganizationDirectory::own_contact(engine.conn(), &org.id, &org.user_id)?;

    println!("Organization {}", org.id);
    println!("  Handle:   {}", org.handle);
    println!("  Verified: {}", if org.verified { "yes" } else { "no" });
    println!("  Company:  {}", contact.company_name);
    println!("  Email:    {}", contact.email);
    println!("  Phone:    {}", contact.phone);
    println!("  Address:  {}", contact.address);
    println!("  Unread:   {}", engine.unread_count(&org.id)?);
    Ok(())
}

pub fn verify(user: Option<&str>, code: &str) -> Result<()> {
    let engine = open_engine()?;
    let org = resolve_org(&engine, user)?;
    if engine.verify_organization(&org.id, code)? {
        println!("Organization {} verified.", org.handle);
    } else {
        bail!("Verification code does not match");
    }
    Ok(())
}

pub fn update_contact(
    user: Option<&str>,
    company: Option<&str>,
    email: Option<&str>,
    phone: Option<&str>,
    address: Option<&str>,
) -> Result<()> {
    let engine = open_engine()?;
    let org = resolve_org(&engine, user)?;
    let current = OrganizationDirectory::own_contact(engine.conn(), &org.id, &org.user_id)?;
    let updated = ContactRecord::new(
        company.unwrap_or(&current.company_name),
        email.unwrap_or(&current.email),
        phone.unwrap_or(&current.phone),
        address.unwrap_or(&current.address),
    );
    if updated == current {
        println!("Nothing to update.");
        return Ok(());
    }
    OrganizationDirectory::update_contact(engine.conn(), &org.id, &org.user_id, &updated)?;
    println!("Contact record updated.");
    Ok(())
}
