// 📥 Batch Decoder - scraped JSON batch → canonical records
//
// Accepted shapes:
//   [ {phone, seller_company, ...}, ... ]
//   { "contacts": [ ... ], "source_site"?: ..., "equipment_category"?: ... }
//
// Field aliases (phone/primary_phone, seller_company/seller,
// location/primary_location) and string-or-number scalars are resolved
// here, so the merge engine only ever sees CanonicalRecord.

use crate::error::{Error, Result};
use serde::de::{self, Unexpected};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

// ============================================================================
// RAW RECORD (as scraped)
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub primary_phone: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub seller_company: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub seller: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub primary_location: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub serial_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub auction_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub year: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub make: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub price: Option<String>,
}

/// Accept strings, numbers and booleans; null/blank → None. Lists and
/// objects are rejected.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let text = match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        Some(serde_json::Value::Array(_)) => {
            return Err(de::Error::invalid_type(Unexpected::Seq, &"a string or number"))
        }
        Some(serde_json::Value::Object(_)) => {
            return Err(de::Error::invalid_type(Unexpected::Map, &"a string or number"))
        }
    };
    Ok(text
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

fn first_present(primary: &Option<String>, fallback: &Option<String>) -> String {
    primary
        .as_ref()
        .or(fallback.as_ref())
        .cloned()
        .unwrap_or_default()
}

// ============================================================================
// CANONICAL RECORD (what the merge engine consumes)
// ============================================================================

/// One scraped listing after alias resolution. Empty string = absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub phone: String,
    pub company: String,
    pub location: String,
    pub email: String,
    pub url: String,
    pub serial_number: String,
    pub auction_date: String,
    pub year: String,
    pub make: String,
    pub model: String,
    pub price: String,
}

impl From<RawRecord> for CanonicalRecord {
    fn from(raw: RawRecord) -> Self {
        CanonicalRecord {
            phone: first_present(&raw.phone, &raw.primary_phone),
            company: first_present(&raw.seller_company, &raw.seller),
            location: first_present(&raw.location, &raw.primary_location),
            email: raw.email.unwrap_or_default(),
            url: raw.url.unwrap_or_default(),
            serial_number: raw.serial_number.unwrap_or_default(),
            auction_date: raw.auction_date.unwrap_or_default(),
            year: raw.year.unwrap_or_default(),
            make: raw.make.unwrap_or_default(),
            model: raw.model.unwrap_or_default(),
            price: raw.price.unwrap_or_default(),
        }
    }
}

impl CanonicalRecord {
    /// Convenience constructor used by callers that build batches in memory
    pub fn new(phone: &str, company: &str) -> Self {
        CanonicalRecord {
            phone: phone.to_string(),
            company: company.to_string(),
            ..Default::default()
        }
    }

    pub fn has_equipment(&self) -> bool {
        !(self.year.is_empty() && self.make.is_empty() && self.model.is_empty() && self.price.is_empty())
    }
}

// ============================================================================
// BATCH
// ============================================================================

/// A decoded batch file plus the fingerprint used for idempotent merges
#[derive(Debug, Clone)]
pub struct Batch {
    pub records: Vec<CanonicalRecord>,
    pub fingerprint: String,
    pub source_site: Option<String>,
    pub equipment_category: Option<String>,
}

impl Batch {
    /// Read and decode a batch file. Missing file or bad JSON → Input error.
    pub fn load<P: AsRef<Path>>(path: P, site: &str, category: &str) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| {
            Error::Input(format!("batch file not readable: {} ({})", path.display(), e))
        })?;
        Batch::from_slice(&bytes, site, category)
    }

    /// Decode batch bytes in either accepted shape
    pub fn from_slice(bytes: &[u8], site: &str, category: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::Input(format!("batch file is not valid JSON: {}", e)))?;

        let (items, source_site, equipment_category) = match value {
            serde_json::Value::Array(items) => (items, None, None),
            serde_json::Value::Object(mut obj) => match obj.remove("contacts") {
                Some(serde_json::Value::Array(items)) => {
                    let site = obj.get("source_site").and_then(|v| v.as_str()).map(String::from);
                    let cat = obj
                        .get("equipment_category")
                        .and_then(|v| v.as_str())
                        .map(String::from);
                    (items, site, cat)
                }
                _ => {
                    return Err(Error::Input(
                        "unrecognized contact file format: object without a contacts list"
                            .to_string(),
                    ))
                }
            },
            _ => {
                return Err(Error::Input(
                    "unrecognized contact file format: expected a list or an object".to_string(),
                ))
            }
        };

        let mut records = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            if !item.is_object() {
                return Err(Error::Input(format!("record {} is not a JSON object", index)));
            }
            let raw: RawRecord = serde_json::from_value(item)
                .map_err(|e| Error::Input(format!("record {} is malformed: {}", index, e)))?;
            records.push(CanonicalRecord::from(raw));
        }

        Ok(Batch {
            records,
            fingerprint: batch_fingerprint(site, category, bytes),
            source_site,
            equipment_category,
        })
    }

    /// Build a batch from records already in memory
    pub fn from_records(records: Vec<CanonicalRecord>, site: &str, category: &str) -> Self {
        let bytes = serde_json::to_vec(&records).unwrap_or_default();
        Batch {
            fingerprint: batch_fingerprint(site, category, &bytes),
            records,
            source_site: None,
            equipment_category: None,
        }
    }

    /// Override the fingerprint (e.g. to model a later scrape of identical content)
    pub fn with_fingerprint(mut self, fingerprint: &str) -> Self {
        self.fingerprint = fingerprint.to_string();
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// SHA-256 over site, category and the raw batch bytes
pub fn batch_fingerprint(site: &str, category: &str, bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(site.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(category.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================
