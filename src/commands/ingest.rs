//! Ingest command - load provider payload files into the vault

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::*;
use mailvault::ingest::IngestReport;
use mailvault::ProviderMessage;
use serde::Serialize;
use walkdir::WalkDir;

#[derive(Serialize)]
struct IngestSummary {
    files: usize,
    unreadable_files: usize,
    #[serde(flatten)]
    report: IngestReport,
    duration_ms: u128,
}

pub fn run(root: &Path, inputs: &[PathBuf], json: bool) -> Result<()> {
    let start = std::time::Instant::now();
    let mut vault = super::open_vault(root)?;

    let files = collect_payload_files(inputs);
    let mut report = IngestReport::default();
    let mut unreadable_files = 0;

    if !json {
        println!("{} Ingesting {} files...", "→".dimmed(), files.len());
    }

    for file in &files {
        let messages = match load_messages(file) {
            Ok(messages) => messages,
            Err(e) => {
                unreadable_files += 1;
                if !json {
                    eprintln!("{} {}: {:#}", "✗".red(), file.display(), e);
                }
                continue;
            }
        };

        let batch = vault.ingest_all(&messages);
        report.stored += batch.stored;
        report.duplicates += batch.duplicates;
        report.indexed += batch.indexed;
        report.failed += batch.failed;
    }

    let summary = IngestSummary {
        files: files.len(),
        unreadable_files,
        report,
        duration_ms: start.elapsed().as_millis(),
    };

    if json {
        return super::print_json(&summary);
    }

    let report = &summary.report;
    println!();
    println!(
        "{} Stored {} messages in {:.2}s",
        "✓".green().bold(),
        report.stored.to_string().cyan(),
        summary.duration_ms as f64 / 1000.0
    );
    let (arrow, cross) = ("→".dimmed(), "✗".red());
    println!("  {} {} indexed for semantic search", arrow, report.indexed);
    if report.duplicates > 0 {
        println!("  {} {} duplicates skipped", arrow, report.duplicates);
    }
    if report.failed > 0 {
        println!("  {} {} messages failed", cross, report.failed);
    }
    if summary.unreadable_files > 0 {
        println!("  {} {} files unreadable", cross, summary.unreadable_files);
    }

    Ok(())
}

/// Files given directly, plus every `*.json` below given directories
fn collect_payload_files(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    files
}

fn load_messages(path: &Path) -> Result<Vec<ProviderMessage>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(ProviderMessage::parse_many(&content)?)
}
