// ⭐ Priority Scorer - contact attributes → (score, level)
//
// Pure function: no I/O, no mutation. Applied at merge time (--rescore),
// at report time, or in bulk over a store without touching stored data.
//
//   listing volume band   ≥50→100  ≥25→80  ≥15→60  ≥8→40  ≥3→20
//   major brand dealer    +25
//   equipment keyword     +15
//   phone ≥10 digits      +10
//   email present         +10
//   sources on >1 site    +20
//
//   level: ≥120 premium, ≥80 high, ≥50 medium, ≥25 low, else minimal

use crate::contact::{Contact, MasterStore};
use crate::identity::phone_digits;
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

// ============================================================================
// PRIORITY LEVEL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityLevel {
    Minimal,
    Low,
    Medium,
    High,
    Premium,
}

impl PriorityLevel {
    pub fn from_score(score: u32) -> Self {
        match score {
            s if s >= 120 => PriorityLevel::Premium,
            s if s >= 80 => PriorityLevel::High,
            s if s >= 50 => PriorityLevel::Medium,
            s if s >= 25 => PriorityLevel::Low,
            _ => PriorityLevel::Minimal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityLevel::Minimal => "minimal",
            PriorityLevel::Low => "low",
            PriorityLevel::Medium => "medium",
            PriorityLevel::High => "high",
            PriorityLevel::Premium => "premium",
        }
    }
}

// ============================================================================
// SCORE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityScore {
    pub score: u32,
    pub level: PriorityLevel,
}

/// Listing-volume band, monotonic in total_listings
pub fn volume_band(total_listings: u64) -> u32 {
    match total_listings {
        n if n >= 50 => 100,
        n if n >= 25 => 80,
        n if n >= 15 => 60,
        n if n >= 8 => 40,
        n if n >= 3 => 20,
        _ => 0,
    }
}

// ============================================================================
// KEYWORD LISTS (rules as data)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordLists {
    /// Curated dealer / manufacturer names
    pub major_brands: Vec<String>,

    /// Generic equipment / machinery / rental words
    pub equipment_keywords: Vec<String>,
}

impl Default for KeywordLists {
    fn default() -> Self {
        let major_brands = [
            "wheeler machinery", "holt cat", "caterpillar", "cat used", "cat financial",
            "john deere", "komatsu", "volvo", "case", "new holland", "kubota",
            "empire southwest", "ring power", "altorfer", "fabick cat", "thompson tractor",
            "boyd cat", "milton cat", "warren cat", "peterson cat",
        ];
        let equipment_keywords = [
            "equipment", "machinery", "tractor", "construction", "rental", "rentals",
        ];

        KeywordLists {
            major_brands: major_brands.iter().map(|s| s.to_string()).collect(),
            equipment_keywords: equipment_keywords.iter().map(|s| s.to_string()).collect(),
        }
    }
}

// ============================================================================
// PRIORITY SCORER
// ============================================================================

pub struct PriorityScorer {
    brands: Vec<String>,
    equipment: Vec<String>,
}

impl PriorityScorer {
    /// Scorer with the curated default keyword lists
    pub fn new() -> Self {
        PriorityScorer::from_lists(KeywordLists::default())
    }

    /// Load keyword lists from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read keyword file: {:?}", path.as_ref()))?;

        let lists: KeywordLists = serde_json::from_str(&content)
            .context("Failed to parse keyword JSON")?;

        Ok(PriorityScorer::from_lists(lists))
    }

    pub fn from_lists(lists: KeywordLists) -> Self {
        // Matching is case-insensitive; store lowercase once
        PriorityScorer {
            brands: lists.major_brands.iter().map(|b| b.to_lowercase()).collect(),
            equipment: lists.equipment_keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Score one contact
    pub fn score(&self, contact: &Contact) -> PriorityScore {
        let mut score = volume_band(contact.total_listings);

        let company = contact.seller_company.to_lowercase();

        if self.brands.iter().any(|brand| company.contains(brand.as_str())) {
            score += 25;
        }

        if self.equipment.iter().any(|kw| company.contains(kw.as_str())) {
            score += 15;
        }

        if phone_digits(&contact.primary_phone).len() >= 10 {
            score += 10;
        }

        if !contact.email.trim().is_empty() {
            score += 10;
        }

        if contact.is_multi_site() {
            score += 20;
        }

        PriorityScore {
            score,
            level: PriorityLevel::from_score(score),
        }
    }

    pub fn level(&self, contact: &Contact) -> PriorityLevel {
        self.score(contact).level
    }
}

impl Default for PriorityScorer {
    fn default() -> Self {
        Self::new()
    }
}

/// Count contacts per computed level (stored contact_priority is untouched)
pub fn priority_breakdown(scorer: &PriorityScorer, store: &MasterStore) -> BTreeMap<PriorityLevel, usize> {
    let mut counts = BTreeMap::new();
    for contact in store.contacts.values() {
        *counts.entry(scorer.level(contact)).or_insert(0) += 1;
    }
    counts
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::Source;
    use crate::record::CanonicalRecord;
    use chrono::NaiveDate;

    fn create_test_contact(phone: &str, company: &str, listings: u64) -> Contact {
        let now = NaiveDate::from_ymd_opt(2025, 8, 17)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let record = CanonicalRecord::new(phone, company);
        let mut contact = Contact::from_record("0123456789ab", &record, "siteA", "excavator", now);
        contact.sources[0].listing_count = listings;
        contact.recompute_total_listings();
        contact
    }

    #[test]
    fn test_volume_bands() {
        assert_eq!(volume_band(0), 0);
        assert_eq!(volume_band(2), 0);
        assert_eq!(volume_band(3), 20);
        assert_eq!(volume_band(8), 40);
        assert_eq!(volume_band(15), 60);
        assert_eq!(volume_band(25), 80);
        assert_eq!(volume_band(50), 100);
        assert_eq!(volume_band(5000), 100);
    }

    #[test]
    fn test_level_thresholds() {
        assert_eq!(PriorityLevel::from_score(0), PriorityLevel::Minimal);
        assert_eq!(PriorityLevel::from_score(24), PriorityLevel::Minimal);
        assert_eq!(PriorityLevel::from_score(25), PriorityLevel::Low);
        assert_eq!(PriorityLevel::from_score(50), PriorityLevel::Medium);
        assert_eq!(PriorityLevel::from_score(80), PriorityLevel::High);
        assert_eq!(PriorityLevel::from_score(120), PriorityLevel::Premium);
    }

    #[test]
    fn test_brand_and_equipment_bonus() {
        let scorer = PriorityScorer::new();
        let contact = create_test_contact("(555) 123-4567", "Holt CAT Equipment Rentals", 1);

        // brand 25 + equipment 15 + phone 10
        let result = scorer.score(&contact);
        assert_eq!(result.score, 50);
        assert_eq!(result.level, PriorityLevel::Medium);
    }

    #[test]
    fn test_brand_bonus_counted_once() {
        let scorer = PriorityScorer::new();
        // "caterpillar" and "cat used" both match
        let contact = create_test_contact("", "Caterpillar Cat Used", 1);
        assert_eq!(scorer.score(&contact).score, 25);
    }

    #[test]
    fn test_email_and_multi_site_bonus() {
        let scorer = PriorityScorer::new();
        let mut contact = create_test_contact("5551234567", "Smith Farms", 30);
        contact.email = "sales@smithfarms.com".to_string();
        contact.sources.push(Source::new(
            "siteB",
            "excavator",
            contact.first_contact_date,
            "",
        ));
        contact.recompute_total_listings();

        // volume 80 + phone 10 + email 10 + multi-site 20
        let result = scorer.score(&contact);
        assert_eq!(result.score, 120);
        assert_eq!(result.level, PriorityLevel::Premium);
    }

    #[test]
    fn test_score_is_monotonic_in_listings() {
        let scorer = PriorityScorer::new();
        let mut previous = 0;

        for listings in 0..120 {
            let contact = create_test_contact("5551234567", "Acme Equipment", listings);
            let score = scorer.score(&contact).score;
            assert!(score >= previous, "score dropped at {} listings", listings);
            previous = score;
        }
    }

    #[test]
    fn test_custom_keyword_lists() {
        let scorer = PriorityScorer::from_lists(KeywordLists {
            major_brands: vec!["ACME".to_string()],
            equipment_keywords: vec![],
        });
        let contact = create_test_contact("", "acme equipment", 1);
        assert_eq!(scorer.score(&contact).score, 25);
    }

    #[test]
    fn test_keyword_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keywords.json");
        fs::write(
            &path,
            r#"{"major_brands": ["bobcat"], "equipment_keywords": ["haul"]}"#,
        )
        .unwrap();

        let scorer = PriorityScorer::from_file(&path).unwrap();
        let contact = create_test_contact("", "Bobcat Haulers", 1);
        assert_eq!(scorer.score(&contact).score, 40);
    }

    #[test]
    fn test_breakdown_does_not_mutate() {
        let scorer = PriorityScorer::new();
        let now = NaiveDate::from_ymd_opt(2025, 8, 17).unwrap().and_hms_opt(9, 0, 0).unwrap();
        let mut store = MasterStore::new(now);
        let contact = create_test_contact("5551234567", "Holt Cat", 60);
        store.contacts.insert(contact.id.clone(), contact);
        let before = store.clone();

        let counts = priority_breakdown(&scorer, &store);

        assert_eq!(counts.get(&PriorityLevel::Premium), Some(&1));
        assert_eq!(store, before);
    }
}
