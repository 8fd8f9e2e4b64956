mod connectors;
mod display;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vigia_core::{ObligationDocument, Period};
use vigia_docs::{AnchorConfig, ObligationRow, TableAnchor, TextExtractor, WordDocument};
use vigia_reconcile::ReportJob;
use vigia_store::{DocumentKey, DocumentStore};

use connectors::Connectors;

#[derive(Parser)]
#[command(name = "vigia", version, about = "Monthly CCTV contract report tooling")]
struct Cli {
    #[command(flatten)]
    connectors: Connectors,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile a report section's obligations and save the result
    Reconcile {
        #[command(flatten)]
        report: ReportArgs,

        /// Print the summary without saving the document
        #[arg(long)]
        dry_run: bool,

        /// Months searched for approved reference observations
        #[arg(long, default_value_t = 12)]
        reference_months: usize,

        /// Read at most this many pages of each PDF annex
        #[arg(long)]
        max_pdf_pages: Option<usize>,
    },
    /// Fill the obligations table of a rendered report
    Inject {
        #[command(flatten)]
        report: ReportArgs,

        /// Rendered report (.docx)
        #[arg(long)]
        input: PathBuf,

        /// Where to write the filled report
        #[arg(long)]
        output: PathBuf,

        /// Heading keyword marking the obligations section (repeatable)
        #[arg(long = "title-keyword")]
        title_keywords: Vec<String>,

        /// Also require the section heading to name the subsection
        #[arg(long)]
        match_subsection: bool,

        /// Minimum columns of the obligations table
        #[arg(long, default_value_t = 5)]
        columns: usize,
    },
    /// Print a period's folder token, or rewrite paths to that period
    Period {
        /// Period as YYYY-MM
        period: Period,
        /// Paths whose folder tokens are rewritten
        paths: Vec<String>,
    },
    /// Print the text extracted from an annex file
    Extract {
        file: PathBuf,

        /// Truncate the output to this many characters
        #[arg(long)]
        max_chars: Option<usize>,

        #[arg(long)]
        max_pdf_pages: Option<usize>,
    },
}

#[derive(Debug, Clone, clap::Args)]
struct ReportArgs {
    /// Report period as YYYY-MM
    #[arg(long)]
    period: Period,

    /// Report section, e.g. 1
    #[arg(long)]
    section: String,

    /// Report subsection, e.g. 1.5
    #[arg(long)]
    subsection: String,
}

impl ReportArgs {
    fn key(&self) -> DocumentKey {
        DocumentKey::new(self.period, &self.section, &self.subsection)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("vigia v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Reconcile {
            report,
            dry_run,
            reference_months,
            max_pdf_pages,
        } => {
            let c = &cli.connectors;
            let job = ReportJob::new(
                c.document_store()?,
                c.blob_store()?,
                Arc::new(c.synthesizer()),
            )
            .with_locator_settings(c.locator_settings())
            .with_extractor(TextExtractor { max_pdf_pages })
            .with_reference_months(reference_months)
            .dry_run(dry_run);

            let key = report.key();
            let summary = job
                .run(&key)
                .await
                .with_context(|| format!("reconciling {key}"))?;
            display::print_job_summary(&summary);
        }
        Command::Inject {
            report,
            input,
            output,
            title_keywords,
            match_subsection,
            columns,
        } => {
            let store = cli.connectors.document_store()?;
            let key = report.key();
            let document = load_document(store.as_ref(), &key).await?;

            let mut config = AnchorConfig {
                expected_columns: columns,
                ..AnchorConfig::default()
            };
            if !title_keywords.is_empty() {
                config.title_keywords = title_keywords;
            }
            if match_subsection {
                config.subsection = Some(report.subsection.clone());
            }
            inject(&document, &config, &input, &output)?;
        }
        Command::Period { period, paths } => {
            if paths.is_empty() {
                println!("{}", period.folder_token());
            }
            for path in &paths {
                println!("{}", period.substitute_tokens(path));
            }
        }
        Command::Extract {
            file,
            max_chars,
            max_pdf_pages,
        } => {
            if !file.is_file() {
                bail!("no such file: {}", file.display());
            }
            let text = TextExtractor { max_pdf_pages }.extract(&file);
            if text.is_empty() {
                eprintln!("No text extracted from {}", file.display());
                return Ok(());
            }
            match max_chars {
                Some(n) => println!("{}", text.chars().take(n).collect::<String>()),
                None => println!("{text}"),
            }
        }
    }

    Ok(())
}

async fn load_document(
    store: &dyn DocumentStore,
    key: &DocumentKey,
) -> anyhow::Result<ObligationDocument> {
    let value = store
        .get(key)
        .await
        .with_context(|| format!("reading {key}"))?
        .with_context(|| format!("no report document stored for {key}"))?;
    serde_json::from_value(value).with_context(|| format!("parsing report document {key}"))
}

/// Fill the table and write `output`, also when no table was found.
fn inject(
    document: &ObligationDocument,
    config: &AnchorConfig,
    input: &Path,
    output: &Path,
) -> anyhow::Result<()> {
    let mut docx =
        WordDocument::open(input).with_context(|| format!("opening {}", input.display()))?;
    let rows: Vec<ObligationRow> = document
        .obligations
        .iter()
        .map(ObligationRow::from_obligation)
        .collect();

    let outcome = TableAnchor::new(config.clone()).inject(&mut docx, &rows);
    docx.save(output)
        .with_context(|| format!("writing {}", output.display()))?;
    display::print_anchor_outcome(&outcome, output);
    Ok(())
}
