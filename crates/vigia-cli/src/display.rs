//! Plain-text summaries of report jobs and table injection.

use std::path::Path;

use vigia_docs::{AnchorOutcome, AnchorStrategy};
use vigia_reconcile::{JobSummary, Outcome};

const MAX_MISSING_SHOWN: usize = 3;

// ── Public API ──

/// Print one line per obligation, then batch totals.
pub fn print_job_summary(summary: &JobSummary) {
    println!("=== {} ===", summary.key);
    println!();

    println!("Obligations");
    for item in &summary.report.items {
        println!("  #{:<5} {}", item.item, outcome_label(&item.outcome));
    }
    println!();

    let report = &summary.report;
    println!("Totals");
    print_count("obligations", report.total());
    print_count("unchanged", report.unchanged());
    print_count("default observation", report.defaults());
    print_count("deterministic fallback", report.fallbacks());
    print_count("missing annexes", report.missing());
    print_count("generated (LLM)", report.generated());
    print_count("failed", report.failed());
    println!();

    println!("Annexes");
    print_count("downloads", summary.locator.fetches);
    print_count("cache hits", summary.locator.cache_hits);
    print_count("not found", summary.locator.misses);
    print_count("items with history", summary.reference_items);
    println!();

    if summary.saved {
        println!("Saved {} (previous version backed up)", summary.key);
    } else {
        println!("Dry run: {} not saved", summary.key);
    }
}

pub fn print_anchor_outcome(outcome: &AnchorOutcome, output: &Path) {
    match outcome {
        AnchorOutcome::Injected { anchor, rows } => {
            println!(
                "Filled table {} with {} rows ({}, score {})",
                anchor.table_index,
                rows,
                strategy_label(anchor.strategy),
                anchor.confidence_score
            );
            println!("  header  {}", anchor.header_signature.join(" | "));
        }
        AnchorOutcome::Abandoned { signatures } => {
            println!("No obligations table found; document written unchanged");
            for (i, sig) in signatures.iter().enumerate() {
                println!("  table {:<3} {}", i, sig.join(" | "));
            }
        }
    }
    println!("Wrote {}", output.display());
}

// ── Formatting ──

fn print_count(label: &str, n: usize) {
    println!("  {:<26} {}", label, n);
}

fn strategy_label(strategy: AnchorStrategy) -> &'static str {
    match strategy {
        AnchorStrategy::Title => "section title",
        AnchorStrategy::HeaderScore => "header keywords",
        AnchorStrategy::FirstWideTable => "first wide table",
    }
}

pub fn outcome_label(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Unchanged => "unchanged".into(),
        Outcome::DefaultUsed => "default observation".into(),
        Outcome::Fallback => "deterministic fallback".into(),
        Outcome::MissingAnnexes(paths) => {
            let shown: Vec<&str> = paths
                .iter()
                .take(MAX_MISSING_SHOWN)
                .map(|p| vigia_core::annex_path::file_name(p))
                .collect();
            let more = paths.len().saturating_sub(MAX_MISSING_SHOWN);
            if more > 0 {
                format!("missing annexes: {} (+{more} more)", shown.join(", "))
            } else {
                format!("missing annexes: {}", shown.join(", "))
            }
        }
        Outcome::Synthesized { llm: true } => "generated (LLM)".into(),
        Outcome::Synthesized { llm: false } => "generated (fallback)".into(),
        Outcome::Failed(reason) => format!("FAILED: {reason}"),
    }
}
