// Document Manager - CLI
// Import, preview, export and browse documents stored in SQLite

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use document_manager::logging::{init_tracing, DEFAULT_FILTER};
use document_manager::{
    AppConfig, CsvCodec, Document, DocumentService, ImportError, Preview, ReconcileStrategy,
    SqliteGateway,
};
use std::path::PathBuf;

/// Document Manager - CSV import/export for documents and their line items
#[derive(Parser, Debug)]
#[command(name = "document-manager")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the SQLite database (overrides config and DOCMGR_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// JSON settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Reconciliation strategy: upsert or replace
    #[arg(long, global = true)]
    strategy: Option<ReconcileStrategy>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import a documents file and an items file
    Import {
        documents: PathBuf,
        items: PathBuf,

        /// Import even if the preview flags rows as invalid
        #[arg(long)]
        force: bool,
    },

    /// Read both files and report rows that look invalid, without writing
    Preview { documents: PathBuf, items: PathBuf },

    /// Export every stored document and item
    Export { documents: PathBuf, items: PathBuf },

    /// List documents
    List,

    /// List the items of one document
    Items { id: i64 },

    /// Show one document with its items
    Show { id: i64 },

    /// Search documents by id, type, date, name or city
    Search { query: String },

    /// Delete a document and its items
    Delete { id: i64 },

    /// Show the audit trail, newest first
    History {
        /// Only events about this entity, e.g. `--entity document:5`
        #[arg(long)]
        entity: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    if let Some(strategy) = cli.strategy {
        config.strategy = strategy;
    }

    init_tracing(config.log_format, DEFAULT_FILTER);

    let gateway = SqliteGateway::open(&config.database_path)
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;
    let service = DocumentService::new(gateway, CsvCodec::polish(), config.strategy);

    match cli.command {
        Commands::Import { documents, items, force } => {
            let preview = service.read_for_preview(&documents, &items).await?;
            if preview.has_warnings() {
                print_preview(&preview);
                if !force {
                    bail!("Some rows look invalid; fix them or re-run with --force");
                }
                println!("⚠️  Continuing despite flagged rows (--force)");
            }

            println!("📂 Importing with strategy '{}'...", service.strategy());
            match service.import_batch(&documents, &items).await {
                Ok(summary) => {
                    println!("✅ {}", summary.summary());
                    if !summary.identity_map.is_empty() {
                        println!("   Renumbered {} documents", summary.identity_map.len());
                    }
                }
                Err(err) => {
                    report_import_failure(&err);
                    return Err(err.into());
                }
            }
        }

        Commands::Preview { documents, items } => {
            let preview = service.read_for_preview(&documents, &items).await?;
            println!(
                "📋 {} documents, {} items read",
                preview.documents.len(),
                preview.items.len()
            );
            if preview.has_warnings() {
                print_preview(&preview);
            } else {
                println!("✅ No rows flagged");
            }
        }

        Commands::Export { documents, items } => {
            let summary = service.export_all(&documents, &items).await?;
            println!(
                "✅ Exported {} documents → {}, {} items → {}",
                summary.documents,
                documents.display(),
                summary.items,
                items.display()
            );
        }

        Commands::List => {
            print_documents(&service.list_documents().await?);
        }

        Commands::Items { id } => {
            let items = service.list_items(id).await?;
            println!("{:>5}  {:<30} {:>10} {:>12} {:>7}", "#", "Product", "Qty", "Price", "Tax%");
            for item in &items {
                println!(
                    "{:>5}  {:<30} {:>10} {:>12} {:>7}",
                    item.ordinal,
                    item.product,
                    service.codec().format_decimal(&item.quantity),
                    service.codec().format_decimal(&item.price),
                    service.codec().format_decimal(&item.tax_rate)
                );
            }
            println!("{} items", items.len());
        }

        Commands::Show { id } => match service.document_detail(id).await? {
            Some(detail) => {
                println!("{}", serde_json::to_string_pretty(&detail)?);
            }
            None => bail!("Document {} not found", id),
        },

        Commands::Search { query } => {
            print_documents(&service.search_documents(&query).await?);
        }

        Commands::Delete { id } => {
            service.delete_document(id).await?;
            println!("🗑️  Deleted document {}", id);
        }

        Commands::History { entity } => {
            let events = match entity.as_deref() {
                Some(entity) => match entity.split_once(':') {
                    Some((entity_type, entity_id)) => service.entity_history(entity_type, entity_id).await?,
                    None => bail!("--entity expects TYPE:ID, e.g. document:5"),
                },
                None => service.history().await?,
            };
            for event in events {
                println!(
                    "{}  {:<18} {}:{}  {}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    event.event_type,
                    event.entity_type,
                    event.entity_id,
                    event.data
                );
            }
        }
    }

    Ok(())
}

fn print_documents(documents: &[Document]) {
    println!(
        "{:>6}  {:<12} {:<10}  {:<15} {:<20} {:<15}",
        "Id", "Type", "Date", "First name", "Last name", "City"
    );
    for doc in documents {
        println!(
            "{:>6}  {:<12} {:<10}  {:<15} {:<20} {:<15}",
            doc.id,
            doc.doc_type,
            doc.date.format("%Y-%m-%d"),
            doc.first_name,
            doc.last_name,
            doc.city
        );
    }
    println!("{} documents", documents.len());
}

fn print_preview(preview: &Preview) {
    for flagged in preview.invalid_documents() {
        let fields: Vec<String> = flagged
            .issues
            .iter()
            .map(|i| format!("{} {}", i.field, i.message))
            .collect();
        println!("⚠️  documents line {} (Id {}): {}", flagged.row.line, flagged.row.id, fields.join(", "));
    }
    for flagged in preview.invalid_items() {
        let fields: Vec<String> = flagged
            .issues
            .iter()
            .map(|i| format!("{} {}", i.field, i.message))
            .collect();
        println!(
            "⚠️  items line {} (DocumentId {}, Ordinal {}): {}",
            flagged.row.line,
            flagged.row.document_id,
            flagged.row.ordinal,
            fields.join(", ")
        );
    }
}

fn report_import_failure(err: &ImportError) {
    eprintln!("❌ Import failed: {}", err);
    if err.is_partially_applied() {
        let phases: Vec<&str> = err.committed_phases().iter().map(|p| p.name()).collect();
        eprintln!("   Already committed: {}", phases.join(", "));
    }
    eprintln!("   {}", err.recovery_hint());
}
