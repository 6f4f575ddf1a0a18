// contact-dedupe: duplicate maintenance for the remote contact store
//
//   analyze → backup → clean → [restore]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use contact_merge::{init_tracing, AppConfig, DuplicateMaintenance, RemoteStore, StdinConfirm};

#[derive(Parser, Debug)]
#[command(author, version, about = "Find and remove duplicate contacts in the remote store", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report duplicates and consistency drift (read-only)
    Analyze,
    /// Snapshot contacts and their dependent tables into backup tables
    Backup,
    /// Delete duplicate contacts and orphaned sources
    Clean,
    /// Replace the live tables with the backup
    Restore,
    /// Row counts and per-category source counts
    Status,
    /// Rebuild the unique_phones projection
    UniquePhones,
}

fn main() {
    init_tracing();
    let args = Args::parse();

    if let Err(e) = run(args.command) {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    let config = AppConfig::load(None).context("Failed to load configuration")?;
    let transport = config
        .remote
        .connect()
        .context("Failed to configure remote store")?;

    let store = RemoteStore::new(transport);
    store.ensure_schema().context("Failed to prepare remote schema")?;

    let confirm = StdinConfirm;
    let maintenance = DuplicateMaintenance::new(store.transport(), &confirm);

    match command {
        Command::Analyze => {
            println!("🔍 Analyzing duplicates...");
            let report = maintenance.analyze()?;

            println!("\n📊 Total contacts:        {}", report.total_contacts);
            println!("📞 Phone duplicates:      {} sets, {} extra rows", report.by_phone.sets, report.by_phone.extra_rows);
            println!("🏢 Company duplicates:    {} sets, {} extra rows", report.by_company.sets, report.by_company.extra_rows);
            println!("🎯 Exact duplicates:      {} sets, {} extra rows", report.exact.sets, report.exact.extra_rows);
            println!("✨ Estimated unique:      {}", report.estimated_unique);
            println!("📉 Duplicate percentage:  {:.1}%", report.duplicate_percent);
            println!("🔗 Orphaned sources:      {}", report.orphaned_sources);
            println!("🧮 Listing mismatches:    {}", report.listing_mismatches);

            if !report.top_phones.is_empty() {
                println!("\n🔝 Most duplicated phones:");
                for (phone, count) in &report.top_phones {
                    println!("   {}  ×{}", phone, count);
                }
            }

            if report.drift_detected {
                println!("\n⚠️  Consistency drift detected. Next: contact-dedupe backup, then clean");
            } else {
                println!("\n✅ No drift detected");
            }
        }
        Command::Backup => {
            let rows = maintenance.backup()?;
            println!("✅ Backup created: {} contacts", rows);
        }
        Command::Clean => {
            let report = maintenance.clean()?;
            println!("🧹 Cleanup complete");
            println!("   Before:   {}", report.contacts_before);
            println!("   After:    {}", report.contacts_after);
            println!("   Removed:  {}", report.duplicates_removed);
            println!("   Orphaned sources removed: {}", report.orphaned_sources_removed);
        }
        Command::Restore => {
            let rows = maintenance.restore()?;
            println!("✅ Restored {} contacts from backup", rows);
        }
        Command::Status => {
            let status = maintenance.status()?;
            println!("📊 Contacts: {}", status.contacts);
            match status.backup_contacts {
                Some(rows) => println!("💾 Backup:   {}", rows),
                None => println!("💾 Backup:   none"),
            }
            println!("🔗 Sources:  {}", status.sources);
            for (category, count) in &status.sources_by_category {
                println!("   {:<20} {}", category, count);
            }
        }
        Command::UniquePhones => {
            let rows = maintenance.unique_phones()?;
            println!("📞 unique_phones rebuilt: {} phone numbers", rows);
        }
    }

    Ok(())
}
