// contact-merge: fold one scraped batch into the master contact store
//
//   contact-merge <batch_file> <site_name> <category>           document store
//   contact-merge --remote <batch_file> <site_name> <category>  remote SQL store

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use contact_merge::{
    apply_batch_file, init_tracing, priority_breakdown, project_unique_phones, verify_invariants,
    AppConfig, Batch, DocumentStore, MergeEngine, MergeSummary, PriorityScorer, RemoteStore,
};
use std::path::PathBuf;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(author, version, about = "Merge a scraped contact batch into the master store", long_about = None)]
struct Args {
    /// JSON batch file (a list of records, or {"contacts": [...]})
    batch_file: PathBuf,

    /// Site the batch was scraped from
    site_name: String,

    /// Equipment category of the batch
    category: String,

    /// Config file (default: ./contact-merge.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Document store file (overrides store_path)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Create an empty store when the store file does not exist
    #[arg(long)]
    init: bool,

    /// Re-apply a batch that was already merged
    #[arg(long)]
    force: bool,

    /// Recompute contact_priority for contacts touched by this batch
    #[arg(long)]
    rescore: bool,

    /// Merge into the remote SQL store instead of the document store
    #[arg(long)]
    remote: bool,

    /// JSON keyword lists for priority scoring (overrides keywords_path)
    #[arg(long)]
    keywords: Option<PathBuf>,
}

fn main() {
    init_tracing();
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    let scorer = match args.keywords.as_ref().or(config.keywords_path.as_ref()) {
        Some(path) => PriorityScorer::from_file(path)?,
        None => PriorityScorer::new(),
    };

    println!("📥 Contact Merge v{}", contact_merge::VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("📂 Batch:    {}", args.batch_file.display());
    println!("🌐 Site:     {}", args.site_name);
    println!("🏗️  Category: {}", args.category);

    if args.remote {
        run_remote(&args, &config)
    } else {
        run_document(&args, &config, scorer)
    }
}

fn run_document(args: &Args, config: &AppConfig, scorer: PriorityScorer) -> Result<()> {
    let path = args.store.clone().unwrap_or_else(|| config.store_path.clone());
    let store = DocumentStore::new(&path);
    let now = Local::now().naive_local();

    if !store.exists() {
        if !args.init {
            anyhow::bail!(
                "Store file not found: {} (run with --init to create it)",
                path.display()
            );
        }
        store.create_empty(now)?;
        println!("🆕 Created empty store: {}", path.display());
    }

    let engine = MergeEngine::with_scorer(scorer).rescore(args.rescore).force(args.force);
    let (updated, summary) = apply_batch_file(
        &store,
        &args.batch_file,
        &args.site_name,
        &args.category,
        &engine,
        now,
    )
    .with_context(|| format!("Failed to merge {}", args.batch_file.display()))?;

    print_summary(&summary);

    let violations = verify_invariants(&updated);
    for violation in &violations {
        warn!(?violation, "store invariant violated");
    }

    println!("\n📊 Master store: {}", path.display());
    println!("   Contacts:   {}", updated.metadata.total_unique_contacts);
    println!("   Sources:    {}", updated.metadata.total_sources);
    println!("   Categories: {}", updated.metadata.categories.join(", "));
    println!("   Unique phones: {}", project_unique_phones(&updated).len());

    println!("\n⭐ Priority breakdown:");
    for (level, count) in priority_breakdown(engine.scorer(), &updated).iter().rev() {
        println!("   {:<8} {}", level.as_str(), count);
    }

    if violations.is_empty() {
        println!("\n✅ Merge complete");
    } else {
        println!("\n⚠️  Merge complete with {} invariant violations", violations.len());
    }

    Ok(())
}

fn run_remote(args: &Args, config: &AppConfig) -> Result<()> {
    if args.rescore {
        warn!("--rescore applies to the document store only; ignored");
    }

    let batch = Batch::load(&args.batch_file, &args.site_name, &args.category)?;
    let transport = config
        .remote
        .connect()
        .context("Failed to configure remote store")?;
    let store = RemoteStore::new(transport);

    store.ensure_schema().context("Failed to prepare remote schema")?;

    let summary = store
        .merge_batch(
            &batch,
            &args.site_name,
            &args.category,
            Local::now().naive_local(),
            args.force,
        )
        .map_err(|e| {
            if e.is_retryable() {
                anyhow::anyhow!("{} (earlier calls are committed; rerun the same batch to finish)", e)
            } else {
                anyhow::anyhow!(e)
            }
        })?;

    print_summary(&summary);
    println!("\n📊 Remote contacts: {}", store.contact_count()?);
    println!("\n✅ Merge complete");

    Ok(())
}

fn print_summary(summary: &MergeSummary) {
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if summary.already_applied {
        println!("⏭️  {}", summary.summary());
        println!("   Use --force to apply it again");
        return;
    }

    println!("🔍 Records processed:  {}", summary.records_seen);
    println!("🆕 New contacts:       {}", summary.new_contacts);
    println!("🔄 Updated contacts:   {}", summary.updated_contacts);
    println!("➕ Sources added:      {}", summary.sources_added);
    if summary.skipped > 0 {
        println!("⚠️  Skipped (no phone or company): {}", summary.skipped);
    }
}
