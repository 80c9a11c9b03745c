use tracing::debug;

use crate::config::{NamingPolicy, SheetColumns};
use crate::domain::{CatalogNumber, ImageRole, SpecimenIdentity, StagingItem, Taxon, TaxonomyPath};
use crate::error::ArchiveError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecimenRecord {
    pub occurrence_id: i64,
    pub catalog_number: Option<String>,
    pub scientific_name: String,
    pub identification_qualifier: Option<String>,
    pub family: Option<String>,
}

/// Read-only view of the curatorial database.
pub trait CuratorialDb: Send + Sync {
    fn find_by_catalog_number(&self, number: &str) -> Result<Vec<SpecimenRecord>, ArchiveError>;
    /// Occurrences owning a collection specimen (lot part) number.
    fn find_by_specimen_number(&self, number: &str) -> Result<Vec<SpecimenRecord>, ArchiveError>;
    fn find_by_name(&self, scientific_name: &str) -> Result<Vec<SpecimenRecord>, ArchiveError>;
    /// Ranks from the highest down to the record's own taxon.
    fn taxonomy(&self, record: &SpecimenRecord) -> Result<Vec<Taxon>, ArchiveError>;
}

pub struct IdentityResolver<D: CuratorialDb> {
    db: D,
    columns: SheetColumns,
    policy: NamingPolicy,
}

impl<D: CuratorialDb> IdentityResolver<D> {
    pub fn new(db: D, columns: SheetColumns, policy: NamingPolicy) -> Self {
        Self {
            db,
            columns,
            policy,
        }
    }

    /// Looks the row up by specimen number, then catalog number, then name.
    /// Every identifier the row carries beyond the one used for the lookup
    /// must agree with the record found.
    pub fn resolve(&self, item: &StagingItem) -> Result<SpecimenIdentity, ArchiveError> {
        let role: ImageRole = item
            .field(&self.columns.role)
            .ok_or_else(|| ArchiveError::InvalidRow(format!("{} is empty", self.columns.role)))?
            .parse()?;
        let prefix = self.policy.catalog_prefix.as_deref();
        let given_catalog = item
            .field(&self.columns.catalog_number)
            .map(|raw| CatalogNumber::parse(raw, prefix))
            .transpose()?;
        let specimen_number = item.field(&self.columns.specimen_number);
        let given_name = item.field(&self.columns.scientific_name);

        let (key, record) = match (specimen_number, &given_catalog, given_name) {
            (Some(specimen), _, _) => {
                let key = format!("specimen number {specimen}");
                let record = single_match(key.clone(), self.db.find_by_specimen_number(specimen)?)?;
                (Some(key), record)
            }
            (None, Some(catalog), _) => {
                let record = single_match(
                    catalog.to_string(),
                    self.db.find_by_catalog_number(catalog.number())?,
                )?;
                (Some(format!("catalog number {catalog}")), record)
            }
            (None, None, Some(name)) => {
                let record =
                    single_match(format!("name {name:?}"), self.db.find_by_name(name.trim())?)?;
                (None, record)
            }
            (None, None, None) => {
                return Err(ArchiveError::InvalidRow(format!(
                    "row has no {}, {} or {}",
                    self.columns.specimen_number,
                    self.columns.catalog_number,
                    self.columns.scientific_name
                )));
            }
        };

        let catalog_number = record
            .catalog_number
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                ArchiveError::IdentityNotFound(format!(
                    "catalog number for occurrence {}",
                    record.occurrence_id
                ))
            })
            .and_then(|value| CatalogNumber::parse(value, prefix))?;

        if let Some(key) = key {
            if let Some(given) = given_catalog.as_ref() {
                if given.number() != catalog_number.number() {
                    return Err(ArchiveError::IdentityMismatch {
                        key,
                        found: catalog_number.to_string(),
                        given: given.to_string(),
                    });
                }
            }
            if let Some(given) = given_name {
                if !same_taxon(&record.scientific_name, given) {
                    return Err(ArchiveError::IdentityMismatch {
                        key,
                        found: record.scientific_name.clone(),
                        given: given.to_string(),
                    });
                }
            }
        }

        let taxa = self.db.taxonomy(&record)?;
        let taxonomy = TaxonomyPath::new(select_ranks(&taxa, &self.policy))?;
        debug!(row = %item.row, catalog = %catalog_number, taxonomy = %taxonomy, "resolved identity");

        Ok(SpecimenIdentity {
            catalog_number,
            specimen_number: specimen_number.map(str::to_string),
            scientific_name: Some(record.scientific_name),
            qualifier: record
                .identification_qualifier
                .map(|qualifier| qualifier.trim().to_string())
                .filter(|qualifier| !qualifier.is_empty()),
            taxonomy,
            role,
        })
    }
}

fn single_match(
    query: String,
    mut records: Vec<SpecimenRecord>,
) -> Result<SpecimenRecord, ArchiveError> {
    match records.len() {
        0 => Err(ArchiveError::IdentityNotFound(query)),
        1 => Ok(records.remove(0)),
        count => Err(ArchiveError::IdentityAmbiguous { query, count }),
    }
}

fn same_taxon(found: &str, given: &str) -> bool {
    normalize_name(found) == normalize_name(given)
}

fn normalize_name(name: &str) -> String {
    name.replace('_', " ")
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Picks the configured ranks in configured order, deriving a subfamily from
/// the genus when the family has rules and the database has none.
pub fn select_ranks(taxa: &[Taxon], policy: &NamingPolicy) -> Vec<Taxon> {
    let lookup = |rank: &str| {
        taxa.iter()
            .find(|taxon| taxon.rank.eq_ignore_ascii_case(rank))
            .map(|taxon| taxon.name.trim().to_string())
    };

    let mut selected = Vec::new();
    for rank in &policy.taxonomy_ranks {
        let name = match rank.to_ascii_lowercase().as_str() {
            "subfamily" => lookup(rank).or_else(|| derived_subfamily(&lookup, policy)),
            "species" => lookup(rank).map(|species| epithet(&species)),
            _ => lookup(rank),
        };
        if let Some(name) = name {
            selected.push(Taxon::new(rank.clone(), name));
        }
    }
    selected
}

fn derived_subfamily(
    lookup: &dyn Fn(&str) -> Option<String>,
    policy: &NamingPolicy,
) -> Option<String> {
    let family = lookup("Family")?;
    let genus = lookup("Genus")?;
    policy.subfamilies.get(&family)?.get(&genus).cloned()
}

fn epithet(species: &str) -> String {
    let mut words = species.split_whitespace();
    let first = words.next().unwrap_or_default();
    words.next().unwrap_or(first).to_string()
}
