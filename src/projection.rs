// 📞 Unique-phones projection - one row per normalized phone number
//
// Derived data, never a source of truth. Same reduction on both backends:
//   representative = contact with most listings (then most recent, then id)
//   company/location       = representative's
//   equipment_category     = representative's busiest source (first on ties)
//   first_seen/last_updated = min/max over the group
//   total_listings         = Σ over the group

use crate::contact::{Contact, MasterStore};
use crate::error::Result;
use crate::remote::statement::{row_i64, row_str, Statement};
use crate::remote::transport::QueryTransport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniquePhone {
    pub phone_number: String,
    pub company_name: String,
    pub location: String,
    pub equipment_category: String,
    pub first_seen_date: String,
    pub last_updated: String,
    pub total_listings: u64,
    pub contact_count: u64,
}

fn busiest_category(contact: &Contact) -> String {
    let mut best: Option<(&str, u64)> = None;
    for source in &contact.sources {
        match best {
            Some((_, count)) if count >= source.listing_count => {}
            _ => best = Some((source.category.as_str(), source.listing_count)),
        }
    }
    best.map(|(c, _)| c.to_string()).unwrap_or_else(|| "unknown".to_string())
}

/// Projection over a document store, ordered by phone number
pub fn project_unique_phones(store: &MasterStore) -> Vec<UniquePhone> {
    let mut groups: BTreeMap<String, Vec<&Contact>> = BTreeMap::new();
    for contact in store.contacts.values() {
        if let Some(digits) = contact.phone_key() {
            groups.entry(digits).or_default().push(contact);
        }
    }

    groups
        .into_iter()
        .filter_map(|(phone_number, contacts)| {
            let representative = contacts.iter().copied().max_by(|a, b| {
                a.total_listings
                    .cmp(&b.total_listings)
                    .then(a.last_updated.cmp(&b.last_updated))
                    .then(b.id.cmp(&a.id))
            })?;

            Some(UniquePhone {
                phone_number,
                company_name: representative.seller_company.clone(),
                location: representative.primary_location.clone(),
                equipment_category: busiest_category(representative),
                first_seen_date: contacts
                    .iter()
                    .map(|c| c.first_contact_date)
                    .min()?
                    .format("%Y-%m-%d")
                    .to_string(),
                last_updated: contacts
                    .iter()
                    .map(|c| c.last_updated)
                    .max()?
                    .format("%Y-%m-%dT%H:%M:%S")
                    .to_string(),
                total_listings: contacts.iter().map(|c| c.total_listings).sum(),
                contact_count: contacts.len() as u64,
            })
        })
        .collect()
}

const REBUILD_SQL: &str = "INSERT INTO unique_phones (phone_number, company_name, location,
        equipment_category, first_seen_date, last_updated, total_listings, contact_count)
    SELECT phone_digits, seller_company, primary_location, category, first_seen, last_seen, total, n
    FROM (
        SELECT c.phone_digits, c.seller_company, c.primary_location,
            COALESCE((SELECT cs.category FROM contact_sources cs WHERE cs.contact_id = c.id
                      ORDER BY cs.listing_count DESC, cs.id ASC LIMIT 1), 'unknown') AS category,
            MIN(c.first_contact_date) OVER w AS first_seen,
            MAX(c.last_updated) OVER w AS last_seen,
            SUM(c.total_listings) OVER w AS total,
            COUNT(*) OVER w AS n,
            ROW_NUMBER() OVER (PARTITION BY c.phone_digits
                               ORDER BY c.total_listings DESC, c.last_updated DESC, c.id ASC) AS rn
        FROM contacts c
        WHERE LENGTH(c.phone_digits) >= 10
        WINDOW w AS (PARTITION BY c.phone_digits)
    )
    WHERE rn = 1";

/// Rebuild the unique_phones table from base tables; returns its row count
pub fn rebuild_unique_phones<T: QueryTransport>(transport: &T) -> Result<u64> {
    transport.execute(&[
        Statement::new("DELETE FROM unique_phones"),
        Statement::new(REBUILD_SQL),
    ])?;

    let count = transport
        .query(Statement::new("SELECT COUNT(*) AS total FROM unique_phones"))?
        .first_i64("total");

    info!(phones = count, "unique phones rebuilt");
    Ok(count.max(0) as u64)
}

/// Read the projection table back, ordered by phone number
pub fn load_unique_phones<T: QueryTransport>(transport: &T) -> Result<Vec<UniquePhone>> {
    let outcome = transport.query(Statement::new(
        "SELECT phone_number, company_name, location, equipment_category, first_seen_date,
                last_updated, total_listings, contact_count
         FROM unique_phones ORDER BY phone_number",
    ))?;

    Ok(outcome
        .rows
        .iter()
        .map(|row| UniquePhone {
            phone_number: row_str(row, "phone_number"),
            company_name: row_str(row, "company_name"),
            location: row_str(row, "location"),
            equipment_category: row_str(row, "equipment_category"),
            first_seen_date: row_str(row, "first_seen_date"),
            last_updated: row_str(row, "last_updated"),
            total_listings: row_i64(row, "total_listings").max(0) as u64,
            contact_count: row_i64(row, "contact_count").max(0) as u64,
        })
        .collect())
}
