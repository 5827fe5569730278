use std::path::Path;

use anyhow::Result;
use colored::*;
use mailvault::search::MatchSource;

pub fn run(
    root: &Path,
    query: &str,
    limit: Option<usize>,
    keyword_only: bool,
    json: bool,
) -> Result<()> {
    let vault = super::open_vault(root)?;
    let limit = limit.unwrap_or(vault.config().search.default_limit);

    if keyword_only {
        let messages = vault.store().search_by_text(query, limit, 0)?;
        if json {
            return super::print_json(&messages);
        }
        print_header(query, messages.len());
        for msg in &messages {
            super::print_message_line(msg);
        }
        return Ok(());
    }

    let results = vault.search(query, Some(limit))?;
    if json {
        return super::print_json(&results);
    }

    print_header(query, results.len());
    for result in &results {
        super::print_message_line(&result.message);
        let how = match result.source {
            MatchSource::Semantic { distance } => format!("semantic, distance {:.3}", distance),
            MatchSource::Keyword => "keyword".to_string(),
        };
        println!("       {}", how.dimmed());
    }

    Ok(())
}

fn print_header(query: &str, found: usize) {
    println!("{}", "Search Results".bold());
    println!("{}", "=".repeat(60));
    println!("Query: \"{}\"", query);
    println!("Found: {} matches", found);
    println!();
    if found == 0 {
        println!("{}", "No matches found.".yellow());
    }
}
