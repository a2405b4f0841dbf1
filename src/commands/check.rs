//! Membership check behind the `test` command.

use anyhow::Result;
use std::net::Ipv4Addr;
use std::path::Path;

use super::load_config;
use crate::enforcer::{check_root, create_engine, FilterEngine};
use crate::prefix::NetworkPrefix;

/// How an address relates to the blacklist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    /// Listed as a single address
    Exact,
    /// Inside a listed range
    CoveredBy(String),
    NotListed,
}

/// Run the `test` command
pub async fn run(ip: &str, config_path: &Path) -> Result<()> {
    let addr: Ipv4Addr = ip
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid IPv4 address: {}", ip))?;
    check_root()?;

    let config = load_config(config_path)?;
    let engine = create_engine(&config)?;

    println!();
    match execute(engine.as_ref(), addr).await? {
        Membership::Exact => println!("{} is BLACKLISTED", addr),
        Membership::CoveredBy(range) => println!("{} is BLACKLISTED (covered by {})", addr, range),
        Membership::NotListed => println!("{} is NOT blacklisted", addr),
    }
    println!();
    Ok(())
}

/// Look `addr` up in the set. Exact entries win over covering ranges.
pub async fn execute(engine: &dyn FilterEngine, addr: Ipv4Addr) -> Result<Membership> {
    let elements = engine.list_elements().await?;

    let exact = addr.to_string();
    if elements.iter().any(|e| *e == exact) {
        return Ok(Membership::Exact);
    }
    Ok(elements
        .into_iter()
        .find(|e| element_covers(e, addr))
        .map_or(Membership::NotListed, Membership::CoveredBy))
}

/// Match against a prefix (`a.b.c.d[/n]`) or a merged interval (`a-b`).
fn element_covers(element: &str, addr: Ipv4Addr) -> bool {
    if let Ok(prefix) = element.parse::<NetworkPrefix>() {
        return prefix.contains_addr(addr);
    }
    match element.split_once('-') {
        Some((start, end)) => match (start.trim().parse::<Ipv4Addr>(), end.trim().parse::<Ipv4Addr>()) {
            (Ok(start), Ok(end)) => start <= addr && addr <= end,
            _ => false,
        },
        None => false,
    }
}
