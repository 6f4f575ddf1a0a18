// 🔀 Merge Engine - fold a batch of scraped records into the master store
//
// merge(store, batch, site, category) -> (store', summary)
//
// Store is threaded through by value: no globals, no file I/O here.
// Existing contacts are found through a phone-digits index built once per
// batch; contacts created earlier in the same batch are added to the index
// so later records in that batch resolve to them.
//
// Invariants after every merge:
//   1. total_unique_contacts == len(contacts)
//   2. total_sources == Σ len(contact.sources)
//   3. contact.total_listings == Σ source.listing_count
//   4. (site, category) unique within a contact's sources
//   5. metadata.categories ⊇ every category seen

use crate::contact::{Contact, MasterStore, Source};
use crate::identity::{free_id, resolve, Resolution, SkipReason};
use crate::priority::PriorityScorer;
use crate::record::{Batch, CanonicalRecord};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

// ============================================================================
// MERGE SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeSummary {
    /// Records in the batch
    pub records_seen: usize,

    /// Records that created a new contact
    pub new_contacts: usize,

    /// Records folded into an existing contact
    pub updated_contacts: usize,

    /// Records rejected (never stored)
    pub skipped: usize,

    pub skip_reasons: BTreeMap<SkipReason, usize>,

    /// New (site, category) entries appended to existing contacts
    pub sources_added: usize,

    /// Batch fingerprint was already recorded; nothing changed
    pub already_applied: bool,
}

impl MergeSummary {
    fn skip(&mut self, reason: SkipReason) {
        self.skipped += 1;
        *self.skip_reasons.entry(reason).or_insert(0) += 1;
    }

    pub fn changed(&self) -> bool {
        self.new_contacts + self.updated_contacts > 0
    }

    pub fn summary(&self) -> String {
        if self.already_applied {
            return format!("Batch already applied: {} records ignored", self.records_seen);
        }
        format!(
            "{} records: {} new, {} updated, {} skipped",
            self.records_seen, self.new_contacts, self.updated_contacts, self.skipped
        )
    }
}

// ============================================================================
// RESOLVED BATCH (shared with the remote backend)
// ============================================================================

/// A record whose identity has been resolved
#[derive(Debug, Clone)]
pub struct ResolvedRecord<'a> {
    pub resolution: Resolution,
    pub record: &'a CanonicalRecord,
}

/// Ledger id a run of `batch` is recorded under. A forced re-application
/// of an applied batch gets its own id so it counts once more.
pub fn ledger_id(batch: &Batch, reapplied: bool, now: NaiveDateTime) -> String {
    if reapplied {
        format!("{}#forced-{}", batch.fingerprint, now.format("%Y-%m-%dT%H:%M:%S"))
    } else {
        batch.fingerprint.clone()
    }
}

/// Resolve every record in file order; unresolvable ones are counted.
/// Company-only ids are salted with `ledger_id` and the record index.
pub fn resolve_batch<'a>(
    batch: &'a Batch,
    ledger_id: &str,
    summary: &mut MergeSummary,
) -> Vec<ResolvedRecord<'a>> {
    let mut resolved = Vec::with_capacity(batch.records.len());

    for (index, record) in batch.records.iter().enumerate() {
        summary.records_seen += 1;
        let salt = format!("{}:{}", ledger_id, index);
        match resolve(&record.phone, &record.company, &salt) {
            Ok(resolution) => resolved.push(ResolvedRecord { resolution, record }),
            Err(reason) => {
                debug!(phone = %record.phone, "skipping unresolvable record");
                summary.skip(reason);
            }
        }
    }

    resolved
}

/// Fill blank attributes from an incoming record; never overwrite
pub fn fill_blanks(contact: &mut Contact, record: &CanonicalRecord) {
    if contact.email.trim().is_empty() && !record.email.is_empty() {
        contact.email = record.email.clone();
    }
    if contact.seller_company.trim().is_empty() && !record.company.is_empty() {
        contact.seller_company = record.company.clone();
    }
    if contact.primary_location.trim().is_empty() && !record.location.is_empty() {
        contact.primary_location = record.location.clone();
    }
}

// ============================================================================
// MERGE ENGINE
// ============================================================================

pub struct MergeEngine {
    /// Recompute contact_priority for every contact the batch touches
    pub rescore: bool,

    /// Re-apply a batch whose fingerprint is already recorded
    pub force: bool,

    scorer: PriorityScorer,
}

impl MergeEngine {
    pub fn new() -> Self {
        MergeEngine {
            rescore: false,
            force: false,
            scorer: PriorityScorer::new(),
        }
    }

    pub fn with_scorer(scorer: PriorityScorer) -> Self {
        MergeEngine {
            rescore: false,
            force: false,
            scorer,
        }
    }

    pub fn rescore(mut self, rescore: bool) -> Self {
        self.rescore = rescore;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn scorer(&self) -> &PriorityScorer {
        &self.scorer
    }

    /// Fold a batch into the store observed on (site, category)
    pub fn merge(
        &self,
        mut store: MasterStore,
        batch: &Batch,
        site: &str,
        category: &str,
        now: NaiveDateTime,
    ) -> (MasterStore, MergeSummary) {
        let mut summary = MergeSummary::default();

        let already = store.has_processed(&batch.fingerprint);
        if already && !self.force {
            info!(fingerprint = %batch.fingerprint, "batch already applied, skipping");
            summary.records_seen = batch.len();
            summary.already_applied = true;
            return (store, summary);
        }

        let ledger = ledger_id(batch, already, now);
        let mut phone_index = build_phone_index(&store);
        let mut touched: HashSet<String> = HashSet::new();

        for resolved in resolve_batch(batch, &ledger, &mut summary) {
            let record = resolved.record;

            let existing_id = match &resolved.resolution {
                Resolution::Keyed { id, phone_digits } => phone_index
                    .get(phone_digits)
                    .cloned()
                    .or_else(|| store.contacts.contains_key(id).then(|| id.clone())),
                Resolution::Unkeyed { .. } => None,
            };

            let existing = match existing_id {
                Some(id) => store.contacts.get_mut(&id),
                None => None,
            };

            match existing {
                Some(contact) => {
                    if observe(contact, record, site, category, now) {
                        summary.sources_added += 1;
                    }
                    touched.insert(contact.id.clone());
                    summary.updated_contacts += 1;
                }
                None => {
                    let id = match &resolved.resolution {
                        Resolution::Keyed { id, .. } => id.clone(),
                        // Never fold into an unrelated contact on a hash collision
                        Resolution::Unkeyed { id } => free_id(id, |c| store.contacts.contains_key(c)),
                    };
                    let contact = Contact::from_record(&id, record, site, category, now);

                    if let Resolution::Keyed { phone_digits, .. } = &resolved.resolution {
                        phone_index.insert(phone_digits.clone(), id.clone());
                    }

                    store.contacts.insert(id.clone(), contact);
                    touched.insert(id);
                    summary.new_contacts += 1;
                }
            }
        }

        if self.rescore {
            for id in &touched {
                if let Some(contact) = store.contacts.get_mut(id) {
                    contact.contact_priority = self.scorer.level(contact);
                }
            }
        }

        store.record_category(category);
        store.recompute_metadata();
        store.metadata.last_updated = now;
        store.mark_processed(&batch.fingerprint);

        if summary.skipped > 0 {
            warn!(skipped = summary.skipped, "records without phone or company were skipped");
        }
        info!(
            site,
            category,
            new = summary.new_contacts,
            updated = summary.updated_contacts,
            skipped = summary.skipped,
            "batch merged"
        );

        (store, summary)
    }
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Phone digits → contact id; on drifted stores the most recent contact wins
fn build_phone_index(store: &MasterStore) -> HashMap<String, String> {
    let mut index: HashMap<String, (String, NaiveDateTime)> = HashMap::with_capacity(store.len());

    for contact in store.contacts.values() {
        let Some(digits) = contact.phone_key() else {
            continue;
        };
        match index.get(&digits) {
            Some((_, seen)) if *seen >= contact.last_updated => {}
            _ => {
                index.insert(digits, (contact.id.clone(), contact.last_updated));
            }
        }
    }

    index.into_iter().map(|(digits, (id, _))| (digits, id)).collect()
}

/// Record one more observation on a contact. Returns true when a new
/// (site, category) source was appended.
fn observe(
    contact: &mut Contact,
    record: &CanonicalRecord,
    site: &str,
    category: &str,
    now: NaiveDateTime,
) -> bool {
    let added = match contact.find_source_mut(site, category) {
        Some(source) => {
            source.listing_count += 1;
            if source.page_url.is_empty() {
                source.page_url = record.url.clone();
            }
            false
        }
        None => {
            contact
                .sources
                .push(Source::new(site, category, now.date(), &record.url));
            true
        }
    };

    contact.recompute_total_listings();
    contact.additional_info.absorb(record);
    fill_blanks(contact, record);
    contact.last_updated = now;

    added
}

// ============================================================================
// INVARIANT CHECKS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvariantViolation {
    ContactCount { recorded: usize, actual: usize },
    SourceCount { recorded: usize, actual: usize },
    ListingSum { contact_id: String, total_listings: u64, source_sum: u64 },
    DuplicateSource { contact_id: String, site: String, category: String },
    MissingCategory { category: String },
}

/// Every violation of invariants 1–5 (empty = consistent)
pub fn verify_invariants(store: &MasterStore) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    let actual_contacts = store.contacts.len();
    if store.metadata.total_unique_contacts != actual_contacts {
        violations.push(InvariantViolation::ContactCount {
            recorded: store.metadata.total_unique_contacts,
            actual: actual_contacts,
        });
    }

    let actual_sources: usize = store.contacts.values().map(|c| c.sources.len()).sum();
    if store.metadata.total_sources != actual_sources {
        violations.push(InvariantViolation::SourceCount {
            recorded: store.metadata.total_sources,
            actual: actual_sources,
        });
    }

    let known: BTreeSet<&str> = store.metadata.categories.iter().map(String::as_str).collect();
    let mut missing: BTreeSet<&str> = BTreeSet::new();

    for contact in store.contacts.values() {
        let sum = contact.sources_listing_sum();
        if contact.total_listings != sum {
            violations.push(InvariantViolation::ListingSum {
                contact_id: contact.id.clone(),
                total_listings: contact.total_listings,
                source_sum: sum,
            });
        }

        let mut seen = HashSet::new();
        for source in &contact.sources {
            if !seen.insert((source.site.as_str(), source.category.as_str())) {
                violations.push(InvariantViolation::DuplicateSource {
                    contact_id: contact.id.clone(),
                    site: source.site.clone(),
                    category: source.category.clone(),
                });
            }
            if !known.contains(source.category.as_str()) {
                missing.insert(source.category.as_str());
            }
        }
    }

    for category in missing {
        violations.push(InvariantViolation::MissingCategory {
            category: category.to_string(),
        });
    }

    violations
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityKey;
    use crate::priority::PriorityLevel;
    use chrono::NaiveDate;

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 8, day)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn empty_store() -> MasterStore {
        MasterStore::new(at(1))
    }

    fn acme_batch(site: &str, category: &str, run: &str) -> Batch {
        Batch::from_records(
            vec![CanonicalRecord::new("(555) 123-4567", "Acme Equipment")],
            site,
            category,
        )
        .with_fingerprint(run)
    }

    fn only_contact(store: &MasterStore) -> &Contact {
        assert_eq!(store.len(), 1, "expected exactly one contact");
        store.contacts.values().next().unwrap()
    }

    #[test]
    fn test_first_merge_creates_one_contact() {
        let engine = MergeEngine::new();
        let (store, summary) =
            engine.merge(empty_store(), &acme_batch("siteA", "excavator", "run-1"), "siteA", "excavator", at(2));

        let contact = only_contact(&store);
        assert_eq!(contact.total_listings, 1);
        assert_eq!(contact.sources.len(), 1);
        assert_eq!(contact.id, IdentityKey::new("5551234567", "Acme Equipment").contact_id());
        assert_eq!(summary.new_contacts, 1);
        assert!(verify_invariants(&store).is_empty());
    }

    #[test]
    fn test_same_source_in_later_batch_increments_listing_count() {
        let engine = MergeEngine::new();
        let (store, _) =
            engine.merge(empty_store(), &acme_batch("siteA", "excavator", "run-1"), "siteA", "excavator", at(2));
        let (store, summary) =
            engine.merge(store, &acme_batch("siteA", "excavator", "run-2"), "siteA", "excavator", at(3));

        let contact = only_contact(&store);
        assert_eq!(contact.total_listings, 2);
        assert_eq!(contact.sources.len(), 1);
        assert_eq!(contact.sources[0].listing_count, 2);
        assert_eq!(summary.updated_contacts, 1);
        assert_eq!(summary.sources_added, 0);
        assert!(verify_invariants(&store).is_empty());
    }

    #[test]
    fn test_new_category_adds_source() {
        let engine = MergeEngine::new();
        let (store, _) =
            engine.merge(empty_store(), &acme_batch("siteA", "excavator", "run-1"), "siteA", "excavator", at(2));
        let (store, summary) =
            engine.merge(store, &acme_batch("siteA", "dozer", "run-2"), "siteA", "dozer", at(3));

        let contact = only_contact(&store);
        assert_eq!(contact.sources.len(), 2);
        assert_eq!(contact.total_listings, 2);
        assert_eq!(contact.sources[1].category, "dozer");
        assert_eq!(contact.first_contact_date, at(2).date());
        assert_eq!(contact.last_updated, at(3));
        assert_eq!(summary.sources_added, 1);
        assert_eq!(store.metadata.categories, vec!["excavator", "dozer"]);
        assert_eq!(store.metadata.total_sources, 2);
    }

    #[test]
    fn test_same_batch_twice_is_idempotent() {
        let engine = MergeEngine::new();
        let batch = acme_batch("siteA", "excavator", "run-1");

        let (first, _) = engine.merge(empty_store(), &batch, "siteA", "excavator", at(2));
        let (second, summary) = engine.merge(first.clone(), &batch, "siteA", "excavator", at(3));

        assert!(summary.already_applied);
        assert!(!summary.changed());
        assert_eq!(first, second);
    }

    #[test]
    fn test_force_reapplies_batch() {
        let batch = acme_batch("siteA", "excavator", "run-1");
        let (store, _) = MergeEngine::new().merge(empty_store(), &batch, "siteA", "excavator", at(2));
        let (store, summary) =
            MergeEngine::new().force(true).merge(store, &batch, "siteA", "excavator", at(3));

        assert!(!summary.already_applied);
        assert_eq!(only_contact(&store).total_listings, 2);
        assert_eq!(store.metadata.processed_batches.len(), 1);
    }

    #[test]
    fn test_unresolvable_record_rejected() {
        let mut nameless = CanonicalRecord::default();
        nameless.location = "Austin, TX".to_string();
        let batch = Batch::from_records(vec![nameless], "siteA", "excavator");

        let (store, summary) = MergeEngine::new().merge(empty_store(), &batch, "siteA", "excavator", at(2));

        assert!(store.is_empty());
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.skip_reasons.get(&SkipReason::Unresolvable), Some(&1));
        assert_eq!(store.metadata.total_unique_contacts, 0);
    }

    #[test]
    fn test_within_batch_duplicates_resolve_to_one_contact() {
        let mut second = CanonicalRecord::new("555.123.4567", "ACME EQUIPMENT LLC");
        second.email = "sales@acme.test".to_string();
        second.make = "Komatsu".to_string();
        let batch = Batch::from_records(
            vec![CanonicalRecord::new("(555) 123-4567", "Acme Equipment"), second],
            "siteA",
            "excavator",
        );

        let (store, summary) = MergeEngine::new().merge(empty_store(), &batch, "siteA", "excavator", at(2));

        let contact = only_contact(&store);
        assert_eq!(summary.new_contacts, 1);
        assert_eq!(summary.updated_contacts, 1);
        assert_eq!(contact.total_listings, 2);
        assert_eq!(contact.seller_company, "Acme Equipment");
        assert_eq!(contact.email, "sales@acme.test");
        assert_eq!(contact.additional_info.equipment_makes, vec!["Komatsu"]);
    }

    #[test]
    fn test_company_only_records_always_new() {
        let engine = MergeEngine::new();
        let batch_one = Batch::from_records(vec![CanonicalRecord::new("", "Acme Equipment")], "siteA", "excavator");
        let batch_two = batch_one.clone().with_fingerprint("run-2");

        let (store, _) = engine.merge(empty_store(), &batch_one, "siteA", "excavator", at(2));
        let (store, summary) = engine.merge(store, &batch_two, "siteA", "excavator", at(3));

        assert_eq!(store.len(), 2);
        assert_eq!(summary.new_contacts, 1);
        assert!(store
            .contacts
            .values()
            .all(|c| c.contact_priority == PriorityLevel::Low));
    }

    #[test]
    fn test_forced_company_only_batch_creates_new_contacts() {
        let batch = Batch::from_records(vec![CanonicalRecord::new("", "Acme Equipment")], "siteA", "excavator");

        let (store, _) = MergeEngine::new().merge(empty_store(), &batch, "siteA", "excavator", at(2));
        let (store, summary) =
            MergeEngine::new().force(true).merge(store, &batch, "siteA", "excavator", at(3));

        assert_eq!(summary.new_contacts, 1);
        assert_eq!(store.len(), 2);
        assert!(verify_invariants(&store).is_empty());
    }

    #[test]
    fn test_company_only_id_collision_does_not_merge() {
        let batch = Batch::from_records(vec![CanonicalRecord::new("", "Acme Equipment")], "siteA", "excavator");
        let salt = format!("{}:0", batch.fingerprint);
        let colliding = resolve("", "Acme Equipment", &salt).unwrap().id().to_string();

        let mut store = empty_store();
        let unrelated = Contact::from_record(
            &colliding,
            &CanonicalRecord::new("5559990000", "Other Co"),
            "siteB",
            "crane",
            at(1),
        );
        store.contacts.insert(colliding.clone(), unrelated);
        store.record_category("crane");
        store.recompute_metadata();

        let (store, summary) = MergeEngine::new().merge(store, &batch, "siteA", "excavator", at(2));

        assert_eq!(summary.new_contacts, 1);
        assert_eq!(summary.updated_contacts, 0);
        assert_eq!(store.len(), 2);

        let untouched = store.get(&colliding).unwrap();
        assert_eq!(untouched.seller_company, "Other Co");
        assert_eq!(untouched.sources.len(), 1);
        assert_eq!(untouched.total_listings, 1);
        assert!(verify_invariants(&store).is_empty());
    }

    #[test]
    fn test_additional_info_merges_without_loss() {
        let mut first = CanonicalRecord::new("5551234567", "Acme");
        first.url = "https://example.test/1".to_string();
        first.year = "2018".to_string();
        let mut second = CanonicalRecord::new("5551234567", "Acme");
        second.url = "https://example.test/2".to_string();
        second.year = "2018".to_string();
        second.serial_number = "SN-1".to_string();

        let engine = MergeEngine::new();
        let (store, _) = engine.merge(
            empty_store(),
            &Batch::from_records(vec![first], "siteA", "excavator"),
            "siteA",
            "excavator",
            at(2),
        );
        let (store, _) = engine.merge(
            store,
            &Batch::from_records(vec![second], "siteB", "excavator"),
            "siteB",
            "excavator",
            at(3),
        );

        let info = &only_contact(&store).additional_info;
        assert_eq!(info.listing_urls, vec!["https://example.test/1", "https://example.test/2"]);
        assert_eq!(info.equipment_years, vec!["2018"]);
        assert_eq!(info.serial_numbers, vec!["SN-1"]);
    }

    #[test]
    fn test_rescore_updates_priority() {
        let mut records = Vec::new();
        for _ in 0..30 {
            records.push(CanonicalRecord::new("5551234567", "Holt Cat"));
        }
        let batch = Batch::from_records(records, "siteA", "excavator");

        let (plain, _) = MergeEngine::new().merge(empty_store(), &batch, "siteA", "excavator", at(2));
        assert_eq!(only_contact(&plain).contact_priority, PriorityLevel::Medium);

        let (rescored, _) =
            MergeEngine::new().rescore(true).merge(empty_store(), &batch, "siteA", "excavator", at(2));
        // volume 80 + brand 25 + phone 10
        assert_eq!(only_contact(&rescored).contact_priority, PriorityLevel::High);
    }

    #[test]
    fn test_invariants_hold_over_many_merges() {
        let engine = MergeEngine::new();
        let mut store = empty_store();
        let sites = ["siteA", "siteB"];
        let categories = ["excavator", "dozer", "crane"];

        for run in 0..12u32 {
            let site = sites[(run % 2) as usize];
            let category = categories[(run % 3) as usize];
            let records = (0..8)
                .map(|i| {
                    let phone = if i % 4 == 3 { String::new() } else { format!("55500000{:02}", (i + run) % 5) };
                    let company = if i == 7 { String::new() } else { format!("Dealer {}", i % 3) };
                    CanonicalRecord::new(&phone, &company)
                })
                .collect();
            let batch = Batch::from_records(records, site, category).with_fingerprint(&format!("run-{}", run));

            let (next, _) = engine.merge(store, &batch, site, category, at(2 + run));
            store = next;
            let violations = verify_invariants(&store);
            assert!(violations.is_empty(), "invariants broken after run {}: {:?}", run, violations);
        }

        for category in categories {
            assert!(store.metadata.categories.iter().any(|c| c == category));
        }
    }

    #[test]
    fn test_verify_invariants_detects_drift() {
        let (mut store, _) = MergeEngine::new().merge(
            empty_store(),
            &acme_batch("siteA", "excavator", "run-1"),
            "siteA",
            "excavator",
            at(2),
        );
        let id = only_contact(&store).id.clone();
        {
            let contact = store.contacts.get_mut(&id).unwrap();
            let duplicate = contact.sources[0].clone();
            contact.sources.push(duplicate);
        }
        store.metadata.categories.clear();

        let violations = verify_invariants(&store);
        assert!(violations.contains(&InvariantViolation::SourceCount { recorded: 1, actual: 2 }));
        assert!(violations.iter().any(|v| matches!(v, InvariantViolation::ListingSum { .. })));
        assert!(violations.iter().any(|v| matches!(v, InvariantViolation::DuplicateSource { .. })));
        assert!(violations.contains(&InvariantViolation::MissingCategory {
            category: "excavator".to_string()
        }));
    }
}
