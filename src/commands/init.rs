use std::fs;
use std::path::Path;

use anyhow::Result;
use colored::*;
use mailvault::core::paths::DataPaths;
use mailvault::{Config, MessageStore};

pub fn run(root: &Path, force: bool) -> Result<()> {
    let config = Config::load(root).unwrap_or_default();
    let paths = DataPaths::with_config(root.to_path_buf(), &config);

    println!("{}", "mailvault init".bold());
    println!("{}", "=".repeat(50));
    println!();

    for (path, purpose) in paths.required_dirs() {
        if path.exists() {
            println!("{} {} exists ({})", "✓".green(), path.display(), purpose);
        } else {
            fs::create_dir_all(path)?;
            println!("{} Created {} ({})", "✓".green(), path.display(), purpose);
        }
    }

    if paths.config.exists() && !force {
        println!("{} {} exists (kept)", "✓".green(), paths.config.display());
    } else {
        config.save(root)?;
        println!("{} Wrote {}", "✓".green(), paths.config.display());
    }

    MessageStore::open(&paths.database)?;
    let database = paths.database.display();
    println!("{} Database ready at {}", "✓".green(), database);

    println!();
    println!("{}", "✓ Vault initialized".green());
    Ok(())
}
