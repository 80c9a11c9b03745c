use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;

pub const DEFAULT_CONFIG_FILE: &str = "specimen-archiver.json";
pub const DEFAULT_OUTREACH_FOLDER: &str = "Outreach";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub folders: FoldersSection,
    pub google_sheets: SheetsSection,
    pub spaces: SpacesSection,
    pub database: DatabaseSection,
    pub catalog: CatalogSection,
    #[serde(default)]
    pub naming: Option<NamingSection>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FoldersSection {
    pub staging_folder: String,
    pub archive_folder: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SheetsSection {
    pub spreadsheet_id: String,
    #[serde(default)]
    pub sheet_name: Option<String>,
    #[serde(default)]
    pub access_token_env: Option<String>,
    #[serde(default)]
    pub columns: Option<ColumnsSection>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ColumnsSection {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub catalog_number: Option<String>,
    #[serde(default)]
    pub specimen_number: Option<String>,
    #[serde(default)]
    pub scientific_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub archive_path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub outreach_duplicate: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SpacesSection {
    pub region: String,
    pub bucket: String,
    #[serde(default)]
    pub access_key_env: Option<String>,
    #[serde(default)]
    pub secret_key_env: Option<String>,
    #[serde(default)]
    pub public_base_url: Option<String>,
    #[serde(default)]
    pub key_prefix: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatabaseSection {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub user: String,
    #[serde(default)]
    pub password_env: Option<String>,
    pub database: String,
    #[serde(default)]
    pub collection_id: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CatalogSection {
    pub endpoint: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct NamingSection {
    #[serde(default)]
    pub catalog_prefix: Option<String>,
    #[serde(default)]
    pub taxonomy_ranks: Option<Vec<String>>,
    #[serde(default)]
    pub role_folder: Option<bool>,
    #[serde(default)]
    pub outreach_folder: Option<String>,
    #[serde(default)]
    pub subfamilies: Option<BTreeMap<String, BTreeMap<String, Vec<String>>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetColumns {
    pub file: String,
    pub catalog_number: String,
    pub specimen_number: String,
    pub scientific_name: String,
    pub role: String,
    pub status: String,
    pub stage: String,
    pub archive_path: String,
    pub url: String,
    pub error: String,
    pub outreach_duplicate: String,
}

impl Default for SheetColumns {
    fn default() -> Self {
        Self {
            file: "File".to_string(),
            catalog_number: "Catalog Number".to_string(),
            specimen_number: "Specimen Number".to_string(),
            scientific_name: "Scientific Name".to_string(),
            role: "Image Role".to_string(),
            status: "Status".to_string(),
            stage: "Stage".to_string(),
            archive_path: "Archive Path".to_string(),
            url: "Image URL".to_string(),
            error: "Error".to_string(),
            outreach_duplicate: "Outreach Duplicate".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SheetsSettings {
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub access_token_env: String,
    pub columns: SheetColumns,
}

#[derive(Debug, Clone)]
pub struct SpacesSettings {
    pub region: String,
    pub bucket: String,
    pub access_key_env: String,
    pub secret_key_env: String,
    pub public_base_url: String,
    pub key_prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password_env: String,
    pub database: String,
    pub collection_id: i64,
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub endpoint: String,
    pub api_key_env: Option<String>,
}

/// genus → subfamily, per family.
pub type SubfamilyRules = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingPolicy {
    pub catalog_prefix: Option<String>,
    pub taxonomy_ranks: Vec<String>,
    pub role_folder: bool,
    /// Archive sub-folder that receives outreach duplicates.
    pub outreach_folder: String,
    pub subfamilies: SubfamilyRules,
}

impl Default for NamingPolicy {
    fn default() -> Self {
        Self {
            catalog_prefix: Some("BPBM".to_string()),
            taxonomy_ranks: default_taxonomy_ranks(),
            role_folder: false,
            outreach_folder: DEFAULT_OUTREACH_FOLDER.to_string(),
            subfamilies: invert_subfamilies(default_subfamilies()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub staging_root: Utf8PathBuf,
    pub archive_root: Utf8PathBuf,
    pub sheets: SheetsSettings,
    pub spaces: SpacesSettings,
    pub database: DatabaseSettings,
    pub catalog: CatalogSettings,
    pub naming: NamingPolicy,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, ArchiveError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(ArchiveError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ArchiveError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ArchiveError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, ArchiveError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(ArchiveError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let staging_root = expand_home(&config.folders.staging_folder)?;
        let archive_root = expand_home(&config.folders.archive_folder)?;
        if staging_root == archive_root {
            return Err(ArchiveError::ConfigParse(
                "staging_folder and archive_folder must differ".to_string(),
            ));
        }

        let sheets = SheetsSettings {
            spreadsheet_id: non_empty("google_sheets.spreadsheet_id", config.google_sheets.spreadsheet_id)?,
            sheet_name: config
                .google_sheets
                .sheet_name
                .unwrap_or_else(|| "Form Responses 1".to_string()),
            access_token_env: config
                .google_sheets
                .access_token_env
                .unwrap_or_else(|| "GOOGLE_SHEETS_TOKEN".to_string()),
            columns: resolve_columns(config.google_sheets.columns.unwrap_or_default()),
        };

        let region = non_empty("spaces.region", config.spaces.region)?;
        let bucket = non_empty("spaces.bucket", config.spaces.bucket)?;
        let public_base_url = config
            .spaces
            .public_base_url
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://{bucket}.{region}.cdn.digitaloceanspaces.com"));
        let spaces = SpacesSettings {
            region,
            bucket,
            access_key_env: config
                .spaces
                .access_key_env
                .unwrap_or_else(|| "SPACES_ACCESS_KEY".to_string()),
            secret_key_env: config
                .spaces
                .secret_key_env
                .unwrap_or_else(|| "SPACES_SECRET_KEY".to_string()),
            public_base_url,
            key_prefix: config
                .spaces
                .key_prefix
                .map(|prefix| prefix.trim_matches('/').to_string())
                .filter(|prefix| !prefix.is_empty()),
        };

        let database = DatabaseSettings {
            host: non_empty("database.host", config.database.host)?,
            port: config.database.port.unwrap_or(3306),
            user: config.database.user,
            password_env: config
                .database
                .password_env
                .unwrap_or_else(|| "CURATORIAL_DB_PASSWORD".to_string()),
            database: non_empty("database.database", config.database.database)?,
            collection_id: config.database.collection_id.unwrap_or(1),
        };

        let catalog = CatalogSettings {
            endpoint: non_empty("catalog.endpoint", config.catalog.endpoint)?,
            api_key_env: config.catalog.api_key_env,
        };

        let naming = resolve_naming(config.naming.unwrap_or_default())?;

        Ok(ResolvedConfig {
            schema_version,
            staging_root,
            archive_root,
            sheets,
            spaces,
            database,
            catalog,
            naming,
        })
    }
}

pub fn default_taxonomy_ranks() -> Vec<String> {
    ["Phylum", "Class", "Family", "Subfamily", "Genus", "Species"]
        .iter()
        .map(|rank| rank.to_string())
        .collect()
}

/// family → subfamily → genera, as written in the config file.
pub fn default_subfamilies() -> BTreeMap<String, BTreeMap<String, Vec<String>>> {
    let achatinellidae: &[(&str, &[&str])] = &[
        (
            "Achatinellinae",
            &["Achatinella", "Newcombia", "Partulina", "Perdicella"],
        ),
        ("Auriculellinae", &["Auriculella", "Gulickia"]),
        (
            "Tornatellidinae",
            &["Philopoa", "Tornatellaria", "Tornatellides"],
        ),
        ("Tornatellininae", &["Elasmias"]),
        (
            "Pacificellinae",
            &["Lamellidea", "Pacificella", "Tornatellinops"],
        ),
    ];
    let subfamilies = achatinellidae
        .iter()
        .map(|(subfamily, genera)| {
            (
                subfamily.to_string(),
                genera.iter().map(|genus| genus.to_string()).collect(),
            )
        })
        .collect();
    BTreeMap::from([("Achatinellidae".to_string(), subfamilies)])
}

fn invert_subfamilies(raw: BTreeMap<String, BTreeMap<String, Vec<String>>>) -> SubfamilyRules {
    raw.into_iter()
        .map(|(family, subfamilies)| {
            let by_genus = subfamilies
                .into_iter()
                .flat_map(|(subfamily, genera)| {
                    genera
                        .into_iter()
                        .map(move |genus| (genus, subfamily.clone()))
                })
                .collect();
            (family, by_genus)
        })
        .collect()
}

fn resolve_naming(section: NamingSection) -> Result<NamingPolicy, ArchiveError> {
    let taxonomy_ranks = section
        .taxonomy_ranks
        .unwrap_or_else(default_taxonomy_ranks);
    if taxonomy_ranks.is_empty() || taxonomy_ranks.iter().any(|rank| rank.trim().is_empty()) {
        return Err(ArchiveError::ConfigParse(
            "naming.taxonomy_ranks must list at least one non-empty rank".to_string(),
        ));
    }
    let catalog_prefix = match section.catalog_prefix {
        Some(prefix) if prefix.trim().is_empty() => None,
        Some(prefix) => Some(prefix.trim().to_string()),
        None => Some("BPBM".to_string()),
    };
    let outreach_folder = section
        .outreach_folder
        .map(|folder| folder.trim().trim_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_OUTREACH_FOLDER.to_string());
    if outreach_folder.is_empty() || outreach_folder.contains("..") {
        return Err(ArchiveError::ConfigParse(
            "naming.outreach_folder must be a plain folder name".to_string(),
        ));
    }
    Ok(NamingPolicy {
        catalog_prefix,
        taxonomy_ranks,
        role_folder: section.role_folder.unwrap_or(false),
        outreach_folder,
        subfamilies: invert_subfamilies(section.subfamilies.unwrap_or_else(default_subfamilies)),
    })
}

fn resolve_columns(section: ColumnsSection) -> SheetColumns {
    let defaults = SheetColumns::default();
    SheetColumns {
        file: section.file.unwrap_or(defaults.file),
        catalog_number: section.catalog_number.unwrap_or(defaults.catalog_number),
        specimen_number: section.specimen_number.unwrap_or(defaults.specimen_number),
        scientific_name: section.scientific_name.unwrap_or(defaults.scientific_name),
        role: section.role.unwrap_or(defaults.role),
        status: section.status.unwrap_or(defaults.status),
        stage: section.stage.unwrap_or(defaults.stage),
        archive_path: section.archive_path.unwrap_or(defaults.archive_path),
        url: section.url.unwrap_or(defaults.url),
        error: section.error.unwrap_or(defaults.error),
        outreach_duplicate: section
            .outreach_duplicate
            .unwrap_or(defaults.outreach_duplicate),
    }
}

fn non_empty(field: &str, value: String) -> Result<String, ArchiveError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ArchiveError::ConfigParse(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn expand_home(raw: &str) -> Result<Utf8PathBuf, ArchiveError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ArchiveError::ConfigParse("folder paths must not be empty".to_string()));
    }
    let Some(rest) = trimmed.strip_prefix("~/") else {
        return Ok(Utf8PathBuf::from(trimmed));
    };
    BaseDirs::new()
        .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.home_dir().join(rest)).ok())
        .ok_or_else(|| ArchiveError::ConfigParse("unable to resolve home directory".to_string()))
}

pub fn read_env(name: &str) -> Result<String, ArchiveError> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ArchiveError::MissingEnv(name.to_string()))
}
