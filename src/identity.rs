// 🔑 Identity Normalizer - phone + company → stable contact id
//
// Identity key = lowercase "{normalized_phone}|{company}", hashed to a
// 12-hex-character id. The same (phone, company) pair yields the same id
// on every run and on both backends.
//
// Phones with fewer than 10 digits are not usable for identity. A record
// with a company but no usable phone cannot be deduplicated: it gets an id
// salted with the batch and its position in the batch, so every batch
// creates new contacts while a rerun of the same batch reproduces its ids
// (company strings are free text, matching on them would silently merge
// unrelated sellers).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Minimum digit count for a phone to take part in identity
pub const MIN_PHONE_DIGITS: usize = 10;

/// Length of the hex id derived from the identity key
pub const CONTACT_ID_LEN: usize = 12;

// ============================================================================
// PHONE NORMALIZATION
// ============================================================================

/// All digits of a raw phone string, in order
pub fn phone_digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Digits of a phone when there are enough of them to identify a contact
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits = phone_digits(raw);
    if digits.len() >= MIN_PHONE_DIGITS {
        Some(digits)
    } else {
        None
    }
}

// ============================================================================
// IDENTITY KEY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityKey {
    /// Normalized phone digits (None = no usable phone)
    pub phone: Option<String>,

    /// Trimmed company name (may be empty when the phone is usable)
    pub company: String,
}

impl IdentityKey {
    pub fn new(raw_phone: &str, company: &str) -> Self {
        IdentityKey {
            phone: normalize_phone(raw_phone),
            company: company.trim().to_string(),
        }
    }

    /// Canonical key string: lowercase "{phone}|{company}"
    pub fn key_string(&self) -> String {
        format!(
            "{}|{}",
            self.phone.as_deref().unwrap_or(""),
            self.company
        )
        .to_lowercase()
    }

    /// Deterministic contact id for this key
    pub fn contact_id(&self) -> String {
        hash_key(&self.key_string())
    }

    pub fn has_phone(&self) -> bool {
        self.phone.is_some()
    }

    pub fn is_resolvable(&self) -> bool {
        self.phone.is_some() || !self.company.is_empty()
    }
}

/// 12-hex prefix of SHA-256 over the key
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..CONTACT_ID_LEN].to_string()
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Why a record was not stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Neither usable phone digits nor a company name
    Unresolvable,
}

/// Outcome of resolving one record's identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Usable phone: deduplicated by phone digits, id from the identity key
    Keyed { id: String, phone_digits: String },

    /// Company only: a new contact, id salted per batch position
    Unkeyed { id: String },
}

impl Resolution {
    pub fn id(&self) -> &str {
        match self {
            Resolution::Keyed { id, .. } => id,
            Resolution::Unkeyed { id } => id,
        }
    }
}

/// Resolve a record's identity, or report why it cannot be stored.
///
/// `salt` only affects company-only records; callers pass something
/// unique to the record's occurrence (batch ledger id + record index).
pub fn resolve(raw_phone: &str, company: &str, salt: &str) -> Result<Resolution, SkipReason> {
    let key = IdentityKey::new(raw_phone, company);

    if !key.is_resolvable() {
        return Err(SkipReason::Unresolvable);
    }

    match &key.phone {
        Some(digits) => Ok(Resolution::Keyed {
            id: key.contact_id(),
            phone_digits: digits.clone(),
        }),
        None => Ok(Resolution::Unkeyed {
            id: hash_key(&format!("{}#{}", key.key_string(), salt)),
        }),
    }
}

/// `id`, or the first rehash of it that `taken` does not claim
pub fn free_id<F>(id: &str, taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    let mut candidate = id.to_string();
    let mut attempt = 0u32;
    while taken(&candidate) {
        attempt += 1;
        candidate = hash_key(&format!("{}#{}", id, attempt));
    }
    candidate
}

// ============================================================================
// TESTS
// ============================================================================
