use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Deserializer};

use super::domain::{ApprovalState, Property, PropertyId, UserId};
use super::repository::{PropertyRepository, RepositoryError};

const SEED_ADMIN: &str = "seed";

#[derive(Debug, thiserror::Error)]
pub enum SeedImportError {
    #[error("failed to read listing seed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid listing seed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("row {row}: {detail}")]
    InvalidRow { row: usize, detail: String },
    #[error("could not store seeded listing: {0}")]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Deserialize)]
struct SeedRow {
    id: String,
    owner_id: String,
    title: String,
    city: String,
    monthly_price: u32,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    approval_state: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    rejection_reason: Option<String>,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

/// Loads listings from a CSV export (`id,owner_id,title,city,monthly_price,approval_state`
/// plus an optional `rejection_reason` column).
pub struct PropertySeedImporter;

impl PropertySeedImporter {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Vec<Property>, SeedImportError> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Vec<Property>, SeedImportError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut properties = Vec::new();

        for (index, record) in csv_reader.deserialize::<SeedRow>().enumerate() {
            let row = record?;
            properties.push(property_from_row(index + 1, row)?);
        }

        Ok(properties)
    }

    /// Insert every seeded listing, returning how many were stored.
    pub fn load_into(
        properties: Vec<Property>,
        repository: &dyn PropertyRepository,
    ) -> Result<usize, SeedImportError> {
        let mut stored = 0;
        for property in properties {
            repository.insert(property)?;
            stored += 1;
        }
        Ok(stored)
    }
}

fn property_from_row(row: usize, seed: SeedRow) -> Result<Property, SeedImportError> {
    let invalid = |detail: String| SeedImportError::InvalidRow { row, detail };

    if seed.id.is_empty() || seed.owner_id.is_empty() {
        return Err(invalid("id and owner_id are required".to_string()));
    }
    if seed.monthly_price == 0 {
        return Err(invalid("monthly_price must be positive".to_string()));
    }

    let state = match seed.approval_state.as_deref() {
        None => ApprovalState::Pending,
        Some(raw) => ApprovalState::parse(raw)
            .ok_or_else(|| invalid(format!("unknown approval_state '{raw}'")))?,
    };
    let rejection_reason = match state {
        ApprovalState::Rejected => Some(
            seed.rejection_reason
                .ok_or_else(|| invalid("rejected rows need a rejection_reason".to_string()))?,
        ),
        _ => None,
    };

    let now = Utc::now();
    let decided = state != ApprovalState::Pending;
    Ok(Property {
        id: PropertyId(seed.id),
        owner_id: UserId(seed.owner_id),
        title: seed.title,
        city: seed.city,
        monthly_price: seed.monthly_price,
        approval_state: state,
        rejection_reason,
        approved_by: decided.then(|| UserId(SEED_ADMIN.to_string())),
        approval_decided_at: decided.then_some(now),
        is_active: state != ApprovalState::Rejected,
        is_available: true,
        created_at: now,
    })
}
