// 📐 Canonical schema of the remote store
//
// contacts 1 ── * contact_sources      (FK, UNIQUE(contact_id, site, category))
// contacts 1 ── * equipment_data       (attribute rows, removed explicitly by clean)
// contacts 1 ── * source_observations  (ledger: one row per batch observation)
//
// listing_count is SUM(source_observations.listing_count), so every write
// below is safe to resubmit.

use super::statement::Statement;

pub const CONTACTS_TABLE: &str = "CREATE TABLE IF NOT EXISTS contacts (
    id TEXT PRIMARY KEY,
    seller_company TEXT NOT NULL DEFAULT '',
    primary_phone TEXT NOT NULL DEFAULT '',
    phone_digits TEXT NOT NULL DEFAULT '',
    primary_location TEXT NOT NULL DEFAULT '',
    email TEXT NOT NULL DEFAULT '',
    city TEXT NOT NULL DEFAULT '',
    state TEXT NOT NULL DEFAULT 'Unknown',
    total_listings INTEGER NOT NULL DEFAULT 0,
    contact_priority TEXT NOT NULL DEFAULT 'medium',
    notes TEXT NOT NULL DEFAULT '',
    first_contact_date TEXT NOT NULL,
    last_updated TEXT NOT NULL
)";

pub const CONTACTS_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_contacts_phone_digits ON contacts(phone_digits)",
    "CREATE INDEX IF NOT EXISTS idx_contacts_company ON contacts(seller_company)",
];

pub const CONTACT_SOURCES_TABLE: &str = "CREATE TABLE IF NOT EXISTS contact_sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    contact_id TEXT NOT NULL REFERENCES contacts(id),
    site TEXT NOT NULL,
    category TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    page_url TEXT NOT NULL DEFAULT '',
    listing_count INTEGER NOT NULL DEFAULT 0,
    UNIQUE(contact_id, site, category)
)";

pub const CONTACT_SOURCES_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_sources_contact ON contact_sources(contact_id)",
    "CREATE INDEX IF NOT EXISTS idx_sources_category ON contact_sources(category)",
];

const EQUIPMENT_TABLE: &str = "CREATE TABLE IF NOT EXISTS equipment_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    contact_id TEXT NOT NULL,
    year TEXT NOT NULL DEFAULT '',
    make TEXT NOT NULL DEFAULT '',
    model TEXT NOT NULL DEFAULT '',
    price TEXT NOT NULL DEFAULT '',
    url TEXT NOT NULL DEFAULT '',
    UNIQUE(contact_id, year, make, model, price, url)
)";

const OBSERVATIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS source_observations (
    batch_id TEXT NOT NULL,
    contact_id TEXT NOT NULL,
    site TEXT NOT NULL,
    category TEXT NOT NULL,
    observed_on TEXT NOT NULL,
    listing_count INTEGER NOT NULL,
    PRIMARY KEY (batch_id, contact_id, site, category)
)";

const PROCESSED_BATCHES_TABLE: &str = "CREATE TABLE IF NOT EXISTS processed_batches (
    batch_id TEXT PRIMARY KEY,
    site TEXT NOT NULL,
    category TEXT NOT NULL,
    record_count INTEGER NOT NULL,
    processed_at TEXT NOT NULL
)";

pub const UNIQUE_PHONES_TABLE: &str = "CREATE TABLE IF NOT EXISTS unique_phones (
    phone_number TEXT PRIMARY KEY,
    company_name TEXT NOT NULL DEFAULT '',
    location TEXT NOT NULL DEFAULT '',
    equipment_category TEXT NOT NULL DEFAULT '',
    first_seen_date TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    total_listings INTEGER NOT NULL DEFAULT 0,
    contact_count INTEGER NOT NULL DEFAULT 0
)";

fn statements(ddl: &[&str]) -> Vec<Statement> {
    ddl.iter().map(|sql| Statement::new(sql)).collect()
}

/// contacts table plus its indexes
pub fn contacts_statements() -> Vec<Statement> {
    let mut all = vec![Statement::new(CONTACTS_TABLE)];
    all.extend(statements(CONTACTS_INDEXES));
    all
}

/// contact_sources table plus its indexes
pub fn contact_sources_statements() -> Vec<Statement> {
    let mut all = vec![Statement::new(CONTACT_SOURCES_TABLE)];
    all.extend(statements(CONTACT_SOURCES_INDEXES));
    all
}

pub fn equipment_statements() -> Vec<Statement> {
    statements(&[
        EQUIPMENT_TABLE,
        "CREATE INDEX IF NOT EXISTS idx_equipment_contact ON equipment_data(contact_id)",
    ])
}

pub fn observations_statements() -> Vec<Statement> {
    statements(&[
        OBSERVATIONS_TABLE,
        "CREATE INDEX IF NOT EXISTS idx_observations_contact ON source_observations(contact_id, site, category)",
    ])
}

/// Full schema, parents before children
pub fn schema_statements() -> Vec<Statement> {
    let mut all = contacts_statements();
    all.extend(contact_sources_statements());
    all.extend(equipment_statements());
    all.extend(observations_statements());
    all.extend(statements(&[PROCESSED_BATCHES_TABLE, UNIQUE_PHONES_TABLE]));
    all
}
