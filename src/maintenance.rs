// 🧹 Duplicate Maintenance - find, back up, clean and restore the remote store
//
// State machine:
//   analyze (read-only) → backup → clean → [restore if needed]
//
// Rows sharing an identity (phone_digits + normalized company) are
// duplicates; the most recently updated row wins (rowid breaks ties).
// Dependent rows go before their contacts, in bounded id chunks.

use crate::error::{Error, Result};
use crate::projection::rebuild_unique_phones;
use crate::remote::batcher::id_chunks;
use crate::remote::schema::{
    contact_sources_statements, contacts_statements, equipment_statements, observations_statements,
};
use crate::remote::statement::{row_i64, row_str, Statement};
use crate::remote::transport::QueryTransport;
use serde::Serialize;
use std::io::{self, BufRead, Write};
use tracing::{info, warn};

// ============================================================================
// CONFIRMATION
// ============================================================================

pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Interactive y/N prompt
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        print!("{} (y/N): ", prompt);
        if io::stdout().flush().is_err() {
            return false;
        }

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => answer.trim().eq_ignore_ascii_case("y"),
            Err(_) => false,
        }
    }
}

/// Same answer to every prompt
pub struct FixedAnswer(pub bool);

impl Confirm for FixedAnswer {
    fn confirm(&self, _prompt: &str) -> bool {
        self.0
    }
}

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DuplicateGroups {
    /// Identities with more than one row
    pub sets: i64,
    /// Rows beyond the first in each set
    pub extra_rows: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DuplicateReport {
    pub total_contacts: i64,
    pub by_phone: DuplicateGroups,
    pub by_company: DuplicateGroups,
    pub exact: DuplicateGroups,
    /// (phone_digits, rows) for the 10 most duplicated phones
    pub top_phones: Vec<(String, i64)>,
    /// contact_sources rows whose contact no longer exists
    pub orphaned_sources: i64,
    /// Contacts whose total_listings differs from Σ source listing_count
    pub listing_mismatches: i64,
    pub estimated_unique: i64,
    pub duplicate_percent: f64,
    pub drift_detected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanReport {
    pub contacts_before: i64,
    pub contacts_after: i64,
    pub duplicates_removed: usize,
    pub orphaned_sources_removed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusReport {
    pub contacts: i64,
    pub backup_contacts: Option<i64>,
    pub sources: i64,
    pub sources_by_category: Vec<(String, i64)>,
}

// ============================================================================
// QUERIES
// ============================================================================

/// Snapshotted by backup, parents first
const BACKED_UP_TABLES: &[&str] = &["contacts", "contact_sources", "equipment_data", "source_observations"];

const IDENTITY_FILTER: &str = "LENGTH(phone_digits) >= 10";

const DUPLICATE_IDS_SQL: &str = "SELECT id FROM (
        SELECT id, ROW_NUMBER() OVER (
            PARTITION BY phone_digits, LOWER(TRIM(seller_company))
            ORDER BY last_updated DESC, rowid DESC) AS rn
        FROM contacts
        WHERE LENGTH(phone_digits) >= 10
    )
    WHERE rn > 1
    ORDER BY id";

const ORPHANED_SOURCES_SQL: &str =
    "SELECT COUNT(*) AS total FROM contact_sources WHERE contact_id NOT IN (SELECT id FROM contacts)";

const LISTING_MISMATCH_SQL: &str = "SELECT COUNT(*) AS total FROM contacts c
    WHERE c.total_listings != (SELECT COALESCE(SUM(s.listing_count), 0)
                               FROM contact_sources s WHERE s.contact_id = c.id)";

fn group_stats_sql(key: &str, filter: &str) -> String {
    format!(
        "SELECT COUNT(*) AS sets, COALESCE(SUM(n - 1), 0) AS extra FROM (
            SELECT COUNT(*) AS n FROM contacts WHERE {} GROUP BY {} HAVING COUNT(*) > 1
        )",
        filter, key
    )
}

// ============================================================================
// DUPLICATE MAINTENANCE
// ============================================================================

pub struct DuplicateMaintenance<'a, T: QueryTransport> {
    transport: &'a T,
    confirm: &'a dyn Confirm,
}

impl<'a, T: QueryTransport> DuplicateMaintenance<'a, T> {
    pub fn new(transport: &'a T, confirm: &'a dyn Confirm) -> Self {
        DuplicateMaintenance { transport, confirm }
    }

    fn send_in_calls(&self, statements: &[Statement]) -> Result<()> {
        for call in statements.chunks(self.transport.limits().max_statements.max(1)) {
            self.transport.execute(call)?;
        }
        Ok(())
    }

    fn count(&self, sql: &str) -> Result<i64> {
        Ok(self.transport.query(Statement::new(sql))?.first_i64("total"))
    }

    fn group_stats(&self, key: &str, filter: &str) -> Result<DuplicateGroups> {
        let outcome = self.transport.query(Statement::new(&group_stats_sql(key, filter)))?;
        let row = outcome.rows.first();
        Ok(DuplicateGroups {
            sets: row.map(|r| row_i64(r, "sets")).unwrap_or(0),
            extra_rows: row.map(|r| row_i64(r, "extra")).unwrap_or(0),
        })
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let outcome = self.transport.query(
            Statement::new("SELECT COUNT(*) AS total FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table),
        )?;
        Ok(outcome.first_i64("total") > 0)
    }

    /// Read-only duplicate and consistency report
    pub fn analyze(&self) -> Result<DuplicateReport> {
        let total_contacts = self.count("SELECT COUNT(*) AS total FROM contacts")?;

        let by_phone = self.group_stats("phone_digits", IDENTITY_FILTER)?;
        let by_company = self.group_stats("LOWER(TRIM(seller_company))", "TRIM(seller_company) != ''")?;
        let exact = self.group_stats("phone_digits, LOWER(TRIM(seller_company))", IDENTITY_FILTER)?;

        let top = self.transport.query(Statement::new(&format!(
            "SELECT phone_digits, COUNT(*) AS n FROM contacts WHERE {}
             GROUP BY phone_digits HAVING COUNT(*) > 1
             ORDER BY n DESC, phone_digits ASC LIMIT 10",
            IDENTITY_FILTER
        )))?;
        let top_phones = top
            .rows
            .iter()
            .map(|row| (row_str(row, "phone_digits"), row_i64(row, "n")))
            .collect();

        let orphaned_sources = self.count(ORPHANED_SOURCES_SQL)?;
        let listing_mismatches = self.count(LISTING_MISMATCH_SQL)?;

        let estimated_unique = total_contacts - exact.extra_rows;
        let duplicate_percent = if total_contacts > 0 {
            exact.extra_rows as f64 * 100.0 / total_contacts as f64
        } else {
            0.0
        };

        let drift_detected = exact.extra_rows > 0 || orphaned_sources > 0 || listing_mismatches > 0;
        if drift_detected {
            warn!(
                duplicates = exact.extra_rows,
                orphaned_sources,
                listing_mismatches,
                "consistency drift detected"
            );
        }

        Ok(DuplicateReport {
            total_contacts,
            by_phone,
            by_company,
            exact,
            top_phones,
            orphaned_sources,
            listing_mismatches,
            estimated_unique,
            duplicate_percent,
            drift_detected,
        })
    }

    /// Snapshot contacts and every table keyed by contact id; returns
    /// backed-up contact rows
    pub fn backup(&self) -> Result<i64> {
        if self.table_exists("contacts_backup")?
            && !self.confirm.confirm("Backup table already exists. Replace it?")
        {
            return Err(Error::Refused("existing backup kept".to_string()));
        }

        let mut statements = Vec::with_capacity(BACKED_UP_TABLES.len() * 2);
        for table in BACKED_UP_TABLES {
            statements.push(Statement::new(&format!("DROP TABLE IF EXISTS {}_backup", table)));
            statements.push(Statement::new(&format!(
                "CREATE TABLE {table}_backup AS SELECT * FROM {table}",
                table = table
            )));
        }
        self.send_in_calls(&statements)?;

        let rows = self.count("SELECT COUNT(*) AS total FROM contacts_backup")?;
        info!(rows, "backup created");
        Ok(rows)
    }

    /// Ids of every duplicate row except each identity's newest
    pub fn duplicate_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .transport
            .query(Statement::new(DUPLICATE_IDS_SQL))?
            .column_strings("id"))
    }

    /// Delete duplicates (dependents first), then orphaned sources
    pub fn clean(&self) -> Result<CleanReport> {
        if !self.table_exists("contacts_backup")?
            && !self
                .confirm
                .confirm("No backup table found. Continue without backup? This is RISKY!")
        {
            return Err(Error::Refused("run backup first".to_string()));
        }

        let contacts_before = self.count("SELECT COUNT(*) AS total FROM contacts")?;
        let ids = self.duplicate_ids()?;

        if !ids.is_empty()
            && !self
                .confirm
                .confirm(&format!("Delete {} duplicate contact rows?", ids.len()))
        {
            return Err(Error::Refused("cleanup cancelled".to_string()));
        }

        let chunk_size = self.transport.limits().id_batch_size;

        for chunk in id_chunks(&ids, chunk_size) {
            self.transport.execute(&[
                Statement::with_id_list("DELETE FROM contact_sources WHERE contact_id IN", chunk),
                Statement::with_id_list("DELETE FROM equipment_data WHERE contact_id IN", chunk),
                Statement::with_id_list("DELETE FROM source_observations WHERE contact_id IN", chunk),
            ])?;
        }

        for chunk in id_chunks(&ids, chunk_size) {
            self.transport
                .query(Statement::with_id_list("DELETE FROM contacts WHERE id IN", chunk))?;
        }

        let orphans = self.transport.query(Statement::new(
            "DELETE FROM contact_sources WHERE contact_id NOT IN (SELECT id FROM contacts)",
        ))?;

        let contacts_after = self.count("SELECT COUNT(*) AS total FROM contacts")?;

        info!(
            before = contacts_before,
            after = contacts_after,
            removed = ids.len(),
            "duplicates cleaned"
        );

        Ok(CleanReport {
            contacts_before,
            contacts_after,
            duplicates_removed: ids.len(),
            orphaned_sources_removed: orphans.changes,
        })
    }

    /// Replace live tables with the backup; returns restored contact rows
    pub fn restore(&self) -> Result<i64> {
        if !self.table_exists("contacts_backup")? {
            return Err(Error::Refused("no backup table to restore from".to_string()));
        }
        if !self
            .confirm
            .confirm("This will replace the current contacts table with the backup. Continue?")
        {
            return Err(Error::Refused("restore cancelled".to_string()));
        }

        let with_sources = self.table_exists("contact_sources_backup")?;
        // Older backups lack these; the live tables are then left alone
        let with_equipment = self.table_exists("equipment_data_backup")?;
        let with_observations = self.table_exists("source_observations_backup")?;

        // Children dropped before parents
        let mut statements = vec![Statement::new("DROP TABLE IF EXISTS contact_sources")];
        if with_equipment {
            statements.push(Statement::new("DROP TABLE IF EXISTS equipment_data"));
        }
        if with_observations {
            statements.push(Statement::new("DROP TABLE IF EXISTS source_observations"));
        }
        statements.push(Statement::new("DROP TABLE IF EXISTS contacts"));

        statements.extend(contacts_statements());
        statements.push(Statement::new("INSERT INTO contacts SELECT * FROM contacts_backup"));
        statements.extend(contact_sources_statements());
        if with_sources {
            statements.push(Statement::new(
                "INSERT INTO contact_sources SELECT * FROM contact_sources_backup",
            ));
        }
        if with_equipment {
            statements.extend(equipment_statements());
            statements.push(Statement::new(
                "INSERT INTO equipment_data SELECT * FROM equipment_data_backup",
            ));
        }
        if with_observations {
            statements.extend(observations_statements());
            statements.push(Statement::new(
                "INSERT INTO source_observations SELECT * FROM source_observations_backup",
            ));
        }

        self.send_in_calls(&statements)?;

        let rows = self.count("SELECT COUNT(*) AS total FROM contacts")?;
        info!(rows, "restored from backup");
        Ok(rows)
    }

    pub fn status(&self) -> Result<StatusReport> {
        let contacts = self.count("SELECT COUNT(*) AS total FROM contacts")?;
        let backup_contacts = if self.table_exists("contacts_backup")? {
            Some(self.count("SELECT COUNT(*) AS total FROM contacts_backup")?)
        } else {
            None
        };
        let sources = self.count("SELECT COUNT(*) AS total FROM contact_sources")?;

        let by_category = self.transport.query(Statement::new(
            "SELECT category, COUNT(*) AS n FROM contact_sources GROUP BY category ORDER BY n DESC, category",
        ))?;

        Ok(StatusReport {
            contacts,
            backup_contacts,
            sources,
            sources_by_category: by_category
                .rows
                .iter()
                .map(|row| (row_str(row, "category"), row_i64(row, "n")))
                .collect(),
        })
    }

    pub fn unique_phones(&self) -> Result<u64> {
        rebuild_unique_phones(self.transport)
    }
}

// ============================================================================
// TESTS
// ============================================================================
