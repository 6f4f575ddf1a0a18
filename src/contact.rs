// 📇 Contact Model - resolved sellers, their sources, and the master store
//
// Contact.id is IDENTITY (hash of the identity key, never changes).
// Everything else is VALUE and grows through merges.

use crate::identity::normalize_phone;
use crate::priority::PriorityLevel;
use crate::record::CanonicalRecord;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

// ============================================================================
// SOURCE
// ============================================================================

/// One (site, category) where a contact was observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub site: String,
    pub category: String,
    pub first_seen: NaiveDate,
    #[serde(default)]
    pub page_url: String,
    pub listing_count: u64,
}

impl Source {
    pub fn new(site: &str, category: &str, first_seen: NaiveDate, page_url: &str) -> Self {
        Source {
            site: site.to_string(),
            category: category.to_string(),
            first_seen,
            page_url: page_url.to_string(),
            listing_count: 1,
        }
    }

    pub fn matches(&self, site: &str, category: &str) -> bool {
        self.site == site && self.category == category
    }
}

// ============================================================================
// ADDITIONAL INFO
// ============================================================================

/// List-valued attributes; each list de-duplicated, first-seen order kept
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalInfo {
    #[serde(default)]
    pub serial_numbers: Vec<String>,
    #[serde(default)]
    pub auction_dates: Vec<String>,
    #[serde(default)]
    pub alternate_locations: Vec<String>,
    #[serde(default)]
    pub equipment_years: Vec<String>,
    #[serde(default)]
    pub equipment_makes: Vec<String>,
    #[serde(default)]
    pub equipment_models: Vec<String>,
    #[serde(default)]
    pub listing_prices: Vec<String>,
    #[serde(default)]
    pub listing_urls: Vec<String>,
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !value.is_empty() && !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

fn union_into(list: &mut Vec<String>, other: &[String]) {
    for value in other {
        push_unique(list, value);
    }
}

impl AdditionalInfo {
    pub fn from_record(record: &CanonicalRecord) -> Self {
        let mut info = AdditionalInfo::default();
        info.absorb(record);
        info
    }

    /// Fold one record's attributes in (set-union, order-preserving)
    pub fn absorb(&mut self, record: &CanonicalRecord) {
        push_unique(&mut self.serial_numbers, &record.serial_number);
        push_unique(&mut self.auction_dates, &record.auction_date);
        push_unique(&mut self.alternate_locations, &record.location);
        push_unique(&mut self.equipment_years, &record.year);
        push_unique(&mut self.equipment_makes, &record.make);
        push_unique(&mut self.equipment_models, &record.model);
        push_unique(&mut self.listing_prices, &record.price);
        push_unique(&mut self.listing_urls, &record.url);
    }

    /// Union another contact's attributes into this one
    pub fn merge(&mut self, other: &AdditionalInfo) {
        union_into(&mut self.serial_numbers, &other.serial_numbers);
        union_into(&mut self.auction_dates, &other.auction_dates);
        union_into(&mut self.alternate_locations, &other.alternate_locations);
        union_into(&mut self.equipment_years, &other.equipment_years);
        union_into(&mut self.equipment_makes, &other.equipment_makes);
        union_into(&mut self.equipment_models, &other.equipment_models);
        union_into(&mut self.listing_prices, &other.listing_prices);
        union_into(&mut self.listing_urls, &other.listing_urls);
    }
}

// ============================================================================
// CONTACT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    // ========================================================================
    // IDENTITY (never changes)
    // ========================================================================
    #[serde(alias = "contact_id")]
    pub id: String,

    // ========================================================================
    // VALUES
    // ========================================================================
    #[serde(default)]
    pub primary_phone: String,
    #[serde(default)]
    pub seller_company: String,
    #[serde(default)]
    pub primary_location: String,
    #[serde(default)]
    pub email: String,

    /// Discovery order; (site, category) unique
    #[serde(default)]
    pub sources: Vec<Source>,

    /// Always Σ sources[].listing_count
    pub total_listings: u64,

    #[serde(default)]
    pub additional_info: AdditionalInfo,

    pub first_contact_date: NaiveDate,
    pub last_updated: NaiveDateTime,

    #[serde(default = "default_priority")]
    pub contact_priority: PriorityLevel,

    #[serde(default)]
    pub notes: String,
}

fn default_priority() -> PriorityLevel {
    PriorityLevel::Medium
}

impl Contact {
    /// Fresh contact from its first observation
    pub fn from_record(
        id: &str,
        record: &CanonicalRecord,
        site: &str,
        category: &str,
        now: NaiveDateTime,
    ) -> Self {
        let has_phone = normalize_phone(&record.phone).is_some();
        let today = now.date();

        Contact {
            id: id.to_string(),
            primary_phone: record.phone.clone(),
            seller_company: record.company.clone(),
            primary_location: record.location.clone(),
            email: record.email.clone(),
            sources: vec![Source::new(site, category, today, &record.url)],
            total_listings: 1,
            additional_info: AdditionalInfo::from_record(record),
            first_contact_date: today,
            last_updated: now,
            contact_priority: if has_phone {
                PriorityLevel::Medium
            } else {
                PriorityLevel::Low
            },
            notes: if has_phone {
                String::new()
            } else {
                "No phone number available".to_string()
            },
        }
    }

    /// Sum of listing counts over sources
    pub fn sources_listing_sum(&self) -> u64 {
        self.sources.iter().map(|s| s.listing_count).sum()
    }

    pub fn recompute_total_listings(&mut self) {
        self.total_listings = self.sources_listing_sum();
    }

    pub fn find_source_mut(&mut self, site: &str, category: &str) -> Option<&mut Source> {
        self.sources.iter_mut().find(|s| s.matches(site, category))
    }

    /// Number of distinct sites among sources
    pub fn distinct_sites(&self) -> usize {
        self.sources
            .iter()
            .map(|s| s.site.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn is_multi_site(&self) -> bool {
        self.distinct_sites() > 1
    }

    /// Normalized phone digits when usable for identity
    pub fn phone_key(&self) -> Option<String> {
        normalize_phone(&self.primary_phone)
    }
}

// ============================================================================
// MASTER STORE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub created_date: NaiveDateTime,
    pub last_updated: NaiveDateTime,
    pub total_unique_contacts: usize,
    pub total_sources: usize,

    /// Every category ever merged; never shrinks
    #[serde(default)]
    pub categories: Vec<String>,

    /// Fingerprints of batches already applied
    #[serde(default)]
    pub processed_batches: Vec<String>,
}

/// Document-backend unit of persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterStore {
    pub metadata: StoreMetadata,
    #[serde(default)]
    pub contacts: BTreeMap<String, Contact>,
}

impl MasterStore {
    pub fn new(now: NaiveDateTime) -> Self {
        MasterStore {
            metadata: StoreMetadata {
                created_date: now,
                last_updated: now,
                total_unique_contacts: 0,
                total_sources: 0,
                categories: Vec::new(),
                processed_batches: Vec::new(),
            },
            contacts: BTreeMap::new(),
        }
    }

    /// Recompute aggregate counters from the contacts
    pub fn recompute_metadata(&mut self) {
        self.metadata.total_unique_contacts = self.contacts.len();
        self.metadata.total_sources = self.contacts.values().map(|c| c.sources.len()).sum();
    }

    /// Add a category to the monotonic set
    pub fn record_category(&mut self, category: &str) {
        push_unique(&mut self.metadata.categories, category);
    }

    pub fn has_processed(&self, fingerprint: &str) -> bool {
        self.metadata.processed_batches.iter().any(|f| f == fingerprint)
    }

    pub fn mark_processed(&mut self, fingerprint: &str) {
        push_unique(&mut self.metadata.processed_batches, fingerprint);
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Contact> {
        self.contacts.get(id)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 8, 17)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap()
    }

    #[test]
    fn test_additional_info_union_preserves_order() {
        let mut info = AdditionalInfo::default();
        info.listing_urls = vec!["u1".to_string(), "u2".to_string()];

        let other = AdditionalInfo {
            listing_urls: vec!["u2".to_string(), "u3".to_string(), "u1".to_string()],
            ..Default::default()
        };
        info.merge(&other);

        assert_eq!(info.listing_urls, vec!["u1", "u2", "u3"]);
    }

    #[test]
    fn test_absorb_skips_empty_values() {
        let mut record = CanonicalRecord::new("5551234567", "Acme");
        record.make = "Caterpillar".to_string();
        let info = AdditionalInfo::from_record(&record);

        assert_eq!(info.equipment_makes, vec!["Caterpillar"]);
        assert!(info.serial_numbers.is_empty());
        assert!(info.alternate_locations.is_empty());
    }

    #[test]
    fn test_new_contact_defaults() {
        let record = CanonicalRecord::new("(555) 123-4567", "Acme Equipment");
        let contact = Contact::from_record("abc123def456", &record, "siteA", "excavator", now());

        assert_eq!(contact.total_listings, 1);
        assert_eq!(contact.sources.len(), 1);
        assert_eq!(contact.contact_priority, PriorityLevel::Medium);
        assert_eq!(contact.first_contact_date, now().date());
        assert!(contact.notes.is_empty());
    }

    #[test]
    fn test_new_contact_without_phone_is_low() {
        let record = CanonicalRecord::new("", "Acme Equipment");
        let contact = Contact::from_record("abc123def456", &record, "siteA", "excavator", now());

        assert_eq!(contact.contact_priority, PriorityLevel::Low);
        assert_eq!(contact.notes, "No phone number available");
    }

    #[test]
    fn test_legacy_contact_id_field_accepted() {
        let json = r#"{
            "contact_id": "0123456789ab",
            "primary_phone": "5551234567",
            "seller_company": "Acme",
            "primary_location": "",
            "email": "",
            "sources": [{"site": "s", "category": "c", "first_seen": "2025-08-17", "page_url": "", "listing_count": 2}],
            "total_listings": 2,
            "first_contact_date": "2025-08-17",
            "last_updated": "2025-08-17T10:30:00.123456",
            "contact_priority": "medium",
            "notes": ""
        }"#;
        let contact: Contact = serde_json::from_str(json).unwrap();

        assert_eq!(contact.id, "0123456789ab");
        assert_eq!(contact.sources_listing_sum(), 2);
        assert_eq!(contact.additional_info, AdditionalInfo::default());
    }

    #[test]
    fn test_categories_never_duplicate() {
        let mut store = MasterStore::new(now());
        store.record_category("excavator");
        store.record_category("dozer");
        store.record_category("excavator");

        assert_eq!(store.metadata.categories, vec!["excavator", "dozer"]);
    }
}
