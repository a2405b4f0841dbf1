//! List command implementation.

use anyhow::Result;
use std::path::Path;

use super::load_config;
use crate::enforcer::{check_root, create_engine, FilterEngine};
use crate::utils::format_count_with_separator;

/// Run the list command
pub async fn run(config_path: &Path) -> Result<()> {
    check_root()?;
    let config = load_config(config_path)?;
    let engine = create_engine(&config)?;

    let elements = execute(engine.as_ref()).await?;
    println!();
    println!(
        "Blacklist {} ({} entries):",
        engine.set_ref().set,
        format_count_with_separator(elements.len())
    );
    println!();
    if elements.is_empty() {
        println!("  (empty)");
    } else {
        for element in &elements {
            println!("  {}", element);
        }
    }
    println!();
    Ok(())
}

/// Set members as the engine prints them; fails if the set is missing.
pub async fn execute(engine: &dyn FilterEngine) -> Result<Vec<String>> {
    engine.list_elements().await
}
