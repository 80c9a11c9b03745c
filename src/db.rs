use std::time::Duration;

use sqlx::MySqlPool;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

use crate::config::{DatabaseSettings, read_env};
use crate::domain::Taxon;
use crate::error::ArchiveError;
use crate::resolver::{CuratorialDb, SpecimenRecord};

const OCCURRENCE_COLUMNS: &str =
    "CAST(o.occid AS SIGNED), o.catalognumber, o.sciname, o.identificationQualifier, o.family";

type OccurrenceRow = (i64, Option<String>, Option<String>, Option<String>, Option<String>);
type TaxonRow = (String, String, i64);

/// Symbiota-schema MySQL database, queried from the blocking pipeline.
pub struct MysqlCuratorialDb {
    runtime: Runtime,
    pool: MySqlPool,
    collection_id: i64,
}

impl MysqlCuratorialDb {
    pub fn connect(settings: &DatabaseSettings) -> Result<Self, ArchiveError> {
        let password = read_env(&settings.password_env)?;
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| ArchiveError::Database(err.to_string()))?;
        let options = MySqlConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&password)
            .database(&settings.database);
        let pool = runtime
            .block_on(
                MySqlPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(Duration::from_secs(30))
                    .connect_with(options),
            )
            .map_err(|err| ArchiveError::Database(err.to_string()))?;
        info!(host = %settings.host, database = %settings.database, "curatorial database connected");
        Ok(Self {
            runtime,
            pool,
            collection_id: settings.collection_id,
        })
    }

    fn occurrences(&self, filter: &str, value: &str) -> Result<Vec<SpecimenRecord>, ArchiveError> {
        let sql = format!(
            "SELECT {OCCURRENCE_COLUMNS} FROM omoccurrences o WHERE o.collid = ? AND o.{filter} = ?"
        );
        self.fetch_occurrences(&sql, value)
    }

    fn fetch_occurrences(&self, sql: &str, value: &str) -> Result<Vec<SpecimenRecord>, ArchiveError> {
        let rows: Vec<OccurrenceRow> = self
            .runtime
            .block_on(
                sqlx::query_as(sql)
                    .bind(self.collection_id)
                    .bind(value)
                    .fetch_all(&self.pool),
            )
            .map_err(|err| ArchiveError::Database(err.to_string()))?;
        Ok(rows
            .into_iter()
            .map(
                |(occurrence_id, catalog_number, sciname, qualifier, family)| SpecimenRecord {
                    occurrence_id,
                    catalog_number,
                    scientific_name: sciname.unwrap_or_default(),
                    identification_qualifier: qualifier,
                    family,
                },
            )
            .collect())
    }

    fn taxon_id(&self, sciname: &str) -> Result<Option<i64>, ArchiveError> {
        let row: Option<(i64,)> = self
            .runtime
            .block_on(
                sqlx::query_as("SELECT CAST(tid AS SIGNED) FROM taxa WHERE sciname = ? LIMIT 1")
                    .bind(sciname)
                    .fetch_optional(&self.pool),
            )
            .map_err(|err| ArchiveError::Database(err.to_string()))?;
        Ok(row.map(|(tid,)| tid))
    }

    /// Every rank name each lineage taxon goes by. `taxonunits` names a rankid
    /// per kingdom: 30 is both Phylum and Division.
    fn lineage(&self, tid: i64) -> Result<Vec<TaxonRow>, ArchiveError> {
        let sql = "SELECT t.sciname, tu.rankname, CAST(t.rankid AS SIGNED) AS rank_order \
                   FROM taxa t JOIN taxonunits tu ON t.rankid = tu.rankid \
                   WHERE t.tid = ? \
                      OR t.tid IN (SELECT te.parenttid FROM taxaenumtree te WHERE te.tid = ?) \
                   ORDER BY rank_order, tu.rankname";
        self.runtime
            .block_on(
                sqlx::query_as(sql)
                    .bind(tid)
                    .bind(tid)
                    .fetch_all(&self.pool),
            )
            .map_err(|err| ArchiveError::Database(err.to_string()))
    }
}

impl CuratorialDb for MysqlCuratorialDb {
    fn find_by_catalog_number(&self, number: &str) -> Result<Vec<SpecimenRecord>, ArchiveError> {
        self.occurrences("catalognumber", number)
    }

    fn find_by_specimen_number(&self, number: &str) -> Result<Vec<SpecimenRecord>, ArchiveError> {
        let sql = format!(
            "SELECT {OCCURRENCE_COLUMNS} FROM omoccurrences o \
             JOIN spcollectionspecimen sp ON sp.occid = o.occid \
             WHERE o.collid = ? AND sp.specimennumber = ?"
        );
        self.fetch_occurrences(&sql, number)
    }

    fn find_by_name(&self, scientific_name: &str) -> Result<Vec<SpecimenRecord>, ArchiveError> {
        self.occurrences("sciname", scientific_name)
    }

    fn taxonomy(&self, record: &SpecimenRecord) -> Result<Vec<Taxon>, ArchiveError> {
        let name = record.scientific_name.trim();
        let genus = name.split_whitespace().next().unwrap_or(name);

        // Unknown names fall back to the genus, then to the occurrence's family.
        let mut tid = self.taxon_id(name)?;
        if tid.is_none() && genus != name {
            tid = self.taxon_id(genus)?;
        }
        if tid.is_none() {
            if let Some(family) = record.family.as_deref().filter(|f| !f.trim().is_empty()) {
                tid = self.taxon_id(family.trim())?;
            }
        }
        let Some(tid) = tid else {
            debug!(sciname = %name, "no taxon found for occurrence");
            return Ok(Vec::new());
        };

        let mut taxa = lineage_taxa(self.lineage(tid)?);
        if !taxa.iter().any(|taxon| taxon.rank.eq_ignore_ascii_case("Family")) {
            if let Some(family) = record.family.as_deref().filter(|f| !f.trim().is_empty()) {
                taxa.push(Taxon::new("Family", family.trim()));
            }
        }
        let has_rank = |taxa: &[Taxon], rank: &str| {
            taxa.iter().any(|taxon| taxon.rank.eq_ignore_ascii_case(rank))
        };
        if name.contains(' ') && !has_rank(&taxa, "Species") {
            if !has_rank(&taxa, "Genus") {
                taxa.push(Taxon::new("Genus", genus));
            }
            taxa.push(Taxon::new("Species", name));
        }
        Ok(taxa)
    }
}

/// Folds lineage rows into one taxon per rank name, the first row winning.
fn lineage_taxa(rows: Vec<TaxonRow>) -> Vec<Taxon> {
    let mut taxa: Vec<Taxon> = Vec::new();
    for (sciname, rank, _) in rows {
        if !taxa.iter().any(|taxon| taxon.rank.eq_ignore_ascii_case(&rank)) {
            taxa.push(Taxon::new(rank, sciname));
        }
    }
    taxa
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NamingPolicy;
    use crate::resolver::select_ranks;

    fn row(sciname: &str, rank: &str, rankid: i64) -> TaxonRow {
        (sciname.to_string(), rank.to_string(), rankid)
    }

    #[test]
    fn kingdom_specific_rank_names_all_survive() {
        let taxa = lineage_taxa(vec![
            row("Animalia", "Kingdom", 10),
            row("Mollusca", "Division", 30),
            row("Mollusca", "Phylum", 30),
            row("Gastropoda", "Class", 60),
            row("Conidae", "Family", 140),
            row("Conus", "Genus", 180),
            row("Conus conus", "Species", 220),
        ]);

        let names: Vec<_> = select_ranks(&taxa, &NamingPolicy::default())
            .into_iter()
            .map(|taxon| taxon.name)
            .collect();

        assert_eq!(names, ["Mollusca", "Gastropoda", "Conidae", "Conus", "conus"]);
    }

    #[test]
    fn first_taxon_per_rank_wins() {
        let taxa = lineage_taxa(vec![row("Conidae", "Family", 140), row("Conoidea", "family", 140)]);
        assert_eq!(taxa, vec![Taxon::new("Family", "Conidae")]);
    }
}
