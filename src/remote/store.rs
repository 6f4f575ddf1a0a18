// ☁️ Remote SQL Store Backend - merge a batch through a query transport
//
// Flow per batch:
//   1. skip if the fingerprint is in processed_batches (unless forced)
//   2. resolve records (same identity rules as the document store)
//   3. look up existing contacts by phone_digits, in bounded IN (...) chunks
//   4. plan one statement group per touched contact
//   5. send groups in calls under the endpoint ceilings
//   6. mark the batch processed (only after every call succeeded)
//
// No transaction spans the batch. A failed call aborts the run with the
// earlier calls committed; every statement is an INSERT OR IGNORE or a
// recompute from the observation ledger, so rerunning the batch converges.

use super::batcher::{id_chunks, StatementBatcher};
use super::schema::schema_statements;
use super::statement::{row_i64, row_str, SqlValue, Statement};
use super::transport::QueryTransport;
use crate::error::Result;
use crate::identity::Resolution;
use crate::merge::{ledger_id, resolve_batch, MergeSummary};
use crate::record::{Batch, CanonicalRecord};
use chrono::NaiveDateTime;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// "City, ST" → ("City", "ST"); state is "Unknown" unless purely alphabetic
pub fn split_location(location: &str) -> (String, String) {
    let city = location.split(',').next().unwrap_or("").trim().to_string();

    let state = match location.rfind(',') {
        Some(idx) => {
            let candidate = location[idx + 1..].trim();
            if !candidate.is_empty() && candidate.chars().all(|c| c.is_alphabetic() || c == ' ') {
                candidate.to_string()
            } else {
                "Unknown".to_string()
            }
        }
        None => "Unknown".to_string(),
    };

    (city, state)
}

// ============================================================================
// ROW VIEWS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteContact {
    pub id: String,
    pub seller_company: String,
    pub primary_phone: String,
    pub phone_digits: String,
    pub primary_location: String,
    pub email: String,
    pub city: String,
    pub state: String,
    pub total_listings: i64,
    pub contact_priority: String,
    pub notes: String,
    pub last_updated: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSource {
    pub site: String,
    pub category: String,
    pub first_seen: String,
    pub listing_count: i64,
}

// ============================================================================
// PLAN
// ============================================================================

/// Everything one batch says about one contact
struct ContactPlan<'a> {
    id: String,
    is_new: bool,
    phone_digits: String,
    records: Vec<&'a CanonicalRecord>,
}

impl<'a> ContactPlan<'a> {
    fn first_non_empty(&self, field: impl Fn(&CanonicalRecord) -> &str) -> String {
        self.records
            .iter()
            .map(|r| field(*r))
            .find(|v| !v.trim().is_empty())
            .unwrap_or("")
            .to_string()
    }

    fn equipment_rows(&self) -> Vec<[String; 5]> {
        let mut seen = BTreeSet::new();
        let mut rows = Vec::new();
        for record in self.records.iter().filter(|r| r.has_equipment()) {
            let row = [
                record.year.clone(),
                record.make.clone(),
                record.model.clone(),
                record.price.clone(),
                record.url.clone(),
            ];
            if seen.insert(row.clone()) {
                rows.push(row);
            }
        }
        rows
    }
}

// ============================================================================
// REMOTE STORE
// ============================================================================

pub struct RemoteStore<T: QueryTransport> {
    transport: T,
    batcher: StatementBatcher,
}

impl<T: QueryTransport> RemoteStore<T> {
    pub fn new(transport: T) -> Self {
        let batcher = StatementBatcher::new(transport.limits());
        RemoteStore { transport, batcher }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Create missing tables and indexes
    pub fn ensure_schema(&self) -> Result<()> {
        let groups = schema_statements().into_iter().map(|s| vec![s]).collect();
        self.send(groups)?;
        Ok(())
    }

    /// Pack groups into calls and send them in order; returns calls sent
    fn send(&self, groups: Vec<Vec<Statement>>) -> Result<usize> {
        let calls = self.batcher.pack(groups)?;
        let total = calls.len();
        for (index, call) in calls.iter().enumerate() {
            debug!(call = index + 1, total, statements = call.len(), "sending call");
            self.transport.execute(call)?;
        }
        Ok(total)
    }

    pub fn is_processed(&self, batch_id: &str) -> Result<bool> {
        let outcome = self.transport.query(
            Statement::new("SELECT COUNT(*) AS total FROM processed_batches WHERE batch_id = ?")
                .bind(batch_id),
        )?;
        Ok(outcome.first_i64("total") > 0)
    }

    pub fn contact_count(&self) -> Result<i64> {
        let outcome = self
            .transport
            .query(Statement::new("SELECT COUNT(*) AS total FROM contacts"))?;
        Ok(outcome.first_i64("total"))
    }

    pub fn fetch_contact(&self, id: &str) -> Result<Option<RemoteContact>> {
        let outcome = self.transport.query(
            Statement::new(
                "SELECT id, seller_company, primary_phone, phone_digits, primary_location, email,
                        city, state, total_listings, contact_priority, notes, last_updated
                 FROM contacts WHERE id = ?",
            )
            .bind(id),
        )?;

        Ok(outcome.rows.first().map(|row| RemoteContact {
            id: row_str(row, "id"),
            seller_company: row_str(row, "seller_company"),
            primary_phone: row_str(row, "primary_phone"),
            phone_digits: row_str(row, "phone_digits"),
            primary_location: row_str(row, "primary_location"),
            email: row_str(row, "email"),
            city: row_str(row, "city"),
            state: row_str(row, "state"),
            total_listings: row_i64(row, "total_listings"),
            contact_priority: row_str(row, "contact_priority"),
            notes: row_str(row, "notes"),
            last_updated: row_str(row, "last_updated"),
        }))
    }

    pub fn fetch_sources(&self, id: &str) -> Result<Vec<RemoteSource>> {
        let outcome = self.transport.query(
            Statement::new(
                "SELECT site, category, first_seen, listing_count
                 FROM contact_sources WHERE contact_id = ? ORDER BY id",
            )
            .bind(id),
        )?;

        Ok(outcome
            .rows
            .iter()
            .map(|row| RemoteSource {
                site: row_str(row, "site"),
                category: row_str(row, "category"),
                first_seen: row_str(row, "first_seen"),
                listing_count: row_i64(row, "listing_count"),
            })
            .collect())
    }

    /// phone_digits → id of the most recently updated matching contact
    fn lookup_phones(&self, digits: &[String]) -> Result<HashMap<String, String>> {
        let mut found: HashMap<String, (String, String)> = HashMap::new();

        for chunk in id_chunks(digits, self.batcher.limits().id_batch_size) {
            let outcome = self.transport.query(Statement::with_id_list(
                "SELECT id, phone_digits, last_updated FROM contacts WHERE phone_digits IN",
                chunk,
            ))?;

            for row in &outcome.rows {
                let candidate = (row_str(row, "last_updated"), row_str(row, "id"));
                let entry = found.entry(row_str(row, "phone_digits")).or_insert_with(|| candidate.clone());
                if candidate > *entry {
                    *entry = candidate;
                }
            }
        }

        Ok(found.into_iter().map(|(digits, (_, id))| (digits, id)).collect())
    }

    /// Ids (of those given) that already have a (site, category) source
    fn ids_with_source(&self, ids: &[String], site: &str, category: &str) -> Result<HashSet<String>> {
        let mut found = HashSet::new();

        for chunk in id_chunks(ids, self.batcher.limits().id_batch_size) {
            let mut stmt = Statement::with_id_list(
                "SELECT contact_id FROM contact_sources WHERE site = ? AND category = ? AND contact_id IN",
                chunk,
            );
            let mut params = vec![SqlValue::from(site), SqlValue::from(category)];
            params.append(&mut stmt.params);
            stmt.params = params;

            found.extend(self.transport.query(stmt)?.column_strings("contact_id"));
        }

        Ok(found)
    }

    /// Merge one batch. `force` re-applies a batch already marked processed.
    pub fn merge_batch(
        &self,
        batch: &Batch,
        site: &str,
        category: &str,
        now: NaiveDateTime,
        force: bool,
    ) -> Result<MergeSummary> {
        let mut summary = MergeSummary::default();

        let already = self.is_processed(&batch.fingerprint)?;
        if already && !force {
            summary.records_seen = batch.len();
            summary.already_applied = true;
            info!(fingerprint = %batch.fingerprint, "batch already applied, nothing to do");
            return Ok(summary);
        }

        // Forced re-application gets its own ledger rows; a plain rerun
        // reuses the fingerprint and so reproduces company-only ids
        let ledger = ledger_id(batch, already, now);

        let resolved = resolve_batch(batch, &ledger, &mut summary);

        let digits: Vec<String> = resolved
            .iter()
            .filter_map(|r| match &r.resolution {
                Resolution::Keyed { phone_digits, .. } => Some(phone_digits.clone()),
                Resolution::Unkeyed { .. } => None,
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let remote = self.lookup_phones(&digits)?;
        let remote_ids: Vec<String> = remote.values().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        let with_source = self.ids_with_source(&remote_ids, site, category)?;

        // Plans in first-appearance order
        let mut plans: Vec<ContactPlan> = Vec::new();
        let mut plan_index: HashMap<String, usize> = HashMap::new();
        let mut created: HashMap<String, String> = HashMap::new();

        for item in &resolved {
            let (id, phone, remote_hit) = match &item.resolution {
                Resolution::Keyed { id, phone_digits } => match remote.get(phone_digits) {
                    Some(existing) => (existing.clone(), phone_digits.clone(), true),
                    None => {
                        let target = created
                            .entry(phone_digits.clone())
                            .or_insert_with(|| id.clone())
                            .clone();
                        (target, phone_digits.clone(), false)
                    }
                },
                Resolution::Unkeyed { id } => (id.clone(), String::new(), false),
            };

            if let Some(&idx) = plan_index.get(&id) {
                plans[idx].records.push(item.record);
                summary.updated_contacts += 1;
                continue;
            }

            if remote_hit {
                summary.updated_contacts += 1;
                if !with_source.contains(&id) {
                    summary.sources_added += 1;
                }
            } else {
                summary.new_contacts += 1;
            }

            plan_index.insert(id.clone(), plans.len());
            plans.push(ContactPlan {
                id,
                is_new: !remote_hit,
                phone_digits: phone,
                records: vec![item.record],
            });
        }

        let mut groups = Vec::with_capacity(plans.len());
        let mut equipment = Vec::new();
        for plan in &plans {
            groups.push(contact_statements(plan, &ledger, site, category, now));
            equipment.extend(
                plan.equipment_rows()
                    .into_iter()
                    .map(|row| vec![equipment_statement(&plan.id, row)]),
            );
        }
        groups.extend(equipment);

        let calls = self.send(groups)?;

        self.transport.query(
            Statement::new(
                "INSERT OR IGNORE INTO processed_batches (batch_id, site, category, record_count, processed_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&batch.fingerprint)
            .bind(site)
            .bind(category)
            .bind(batch.len())
            .bind(now.format(TIMESTAMP_FORMAT).to_string()),
        )?;

        info!(
            calls,
            new = summary.new_contacts,
            updated = summary.updated_contacts,
            skipped = summary.skipped,
            "batch merged into remote store"
        );

        Ok(summary)
    }
}

// ============================================================================
// STATEMENT PLANNING
// ============================================================================

fn contact_statements(
    plan: &ContactPlan,
    ledger_id: &str,
    site: &str,
    category: &str,
    now: NaiveDateTime,
) -> Vec<Statement> {
    let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
    let today = now.format(DATE_FORMAT).to_string();
    let company = plan.first_non_empty(|r| r.company.as_str());
    let location = plan.first_non_empty(|r| r.location.as_str());
    let email = plan.first_non_empty(|r| r.email.as_str());
    let page_url = plan.first_non_empty(|r| r.url.as_str());
    let (city, state) = split_location(&location);
    let listings = plan.records.len();
    let id = plan.id.as_str();

    let mut statements = Vec::with_capacity(7);

    if plan.is_new {
        let has_phone = !plan.phone_digits.is_empty();
        let phone = plan.records.first().map(|r| r.phone.clone()).unwrap_or_default();
        statements.push(
            Statement::new(
                "INSERT OR IGNORE INTO contacts (id, seller_company, primary_phone, phone_digits,
                    primary_location, email, city, state, total_listings, contact_priority, notes,
                    first_contact_date, last_updated)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(company)
            .bind(phone)
            .bind(&plan.phone_digits)
            .bind(location)
            .bind(email)
            .bind(city)
            .bind(state)
            .bind(if has_phone { "medium" } else { "low" })
            .bind(if has_phone { "" } else { "No phone number available" })
            .bind(today.as_str())
            .bind(timestamp.as_str()),
        );
    } else {
        // Fill blanks only; CASE sees the row's old values
        statements.push(
            Statement::new(
                "UPDATE contacts SET
                    email = CASE WHEN TRIM(email) = '' THEN ? ELSE email END,
                    seller_company = CASE WHEN TRIM(seller_company) = '' THEN ? ELSE seller_company END,
                    city = CASE WHEN TRIM(primary_location) = '' THEN ? ELSE city END,
                    state = CASE WHEN TRIM(primary_location) = '' THEN ? ELSE state END,
                    primary_location = CASE WHEN TRIM(primary_location) = '' THEN ? ELSE primary_location END,
                    last_updated = ?
                 WHERE id = ?",
            )
            .bind(email)
            .bind(company)
            .bind(city)
            .bind(state)
            .bind(location)
            .bind(timestamp.as_str())
            .bind(id),
        );

        // Pre-ledger source rows keep their count as a seed observation
        statements.push(
            Statement::new(
                "INSERT OR IGNORE INTO source_observations
                    (batch_id, contact_id, site, category, observed_on, listing_count)
                 SELECT 'legacy', contact_id, site, category, first_seen, listing_count
                 FROM contact_sources s
                 WHERE s.contact_id = ? AND s.site = ? AND s.category = ? AND s.listing_count > 0
                   AND NOT EXISTS (SELECT 1 FROM source_observations o
                                   WHERE o.contact_id = s.contact_id AND o.site = s.site AND o.category = s.category)",
            )
            .bind(id)
            .bind(site)
            .bind(category),
        );
    }

    statements.push(
        Statement::new(
            "INSERT OR IGNORE INTO source_observations
                (batch_id, contact_id, site, category, observed_on, listing_count)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(ledger_id)
        .bind(id)
        .bind(site)
        .bind(category)
        .bind(today.as_str())
        .bind(listings),
    );

    statements.push(
        Statement::new(
            "INSERT OR IGNORE INTO contact_sources (contact_id, site, category, first_seen, page_url, listing_count)
             VALUES (?, ?, ?, ?, ?, 0)",
        )
        .bind(id)
        .bind(site)
        .bind(category)
        .bind(today.as_str())
        .bind(page_url),
    );

    statements.push(
        Statement::new(
            "UPDATE contact_sources SET listing_count = COALESCE(
                (SELECT SUM(o.listing_count) FROM source_observations o
                 WHERE o.contact_id = contact_sources.contact_id
                   AND o.site = contact_sources.site
                   AND o.category = contact_sources.category),
                listing_count)
             WHERE contact_id = ? AND site = ? AND category = ?",
        )
        .bind(id)
        .bind(site)
        .bind(category),
    );

    statements.push(
        Statement::new(
            "UPDATE contacts SET total_listings =
                (SELECT COALESCE(SUM(listing_count), 0) FROM contact_sources WHERE contact_id = ?)
             WHERE id = ?",
        )
        .bind(id)
        .bind(id),
    );

    statements
}

fn equipment_statement(contact_id: &str, row: [String; 5]) -> Statement {
    let [year, make, model, price, url] = row;
    Statement::new(
        "INSERT OR IGNORE INTO equipment_data (contact_id, year, make, model, price, url)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(contact_id)
    .bind(year)
    .bind(make)
    .bind(model)
    .bind(price)
    .bind(url)
}

// ============================================================================
// TESTS
// ============================================================================
