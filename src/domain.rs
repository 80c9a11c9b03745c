use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey(pub u32);

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InProgress,
    Done,
    Failed,
    Skipped,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Done => "done",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
        }
    }

    pub fn is_eligible(self) -> bool {
        matches!(
            self,
            ItemStatus::Pending | ItemStatus::InProgress | ItemStatus::Failed
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = ArchiveError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "" | "pending" => Ok(ItemStatus::Pending),
            "in_progress" => Ok(ItemStatus::InProgress),
            "done" => Ok(ItemStatus::Done),
            "failed" => Ok(ItemStatus::Failed),
            "skipped" | "skip" => Ok(ItemStatus::Skipped),
            _ => Err(ArchiveError::InvalidRow(format!("unknown status {value:?}"))),
        }
    }
}

/// Milestones an item passes through, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolved,
    Planned,
    Moved,
    Published,
    Notified,
    Recorded,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Resolved => "resolved",
            Stage::Planned => "planned",
            Stage::Moved => "moved",
            Stage::Published => "published",
            Stage::Notified => "notified",
            Stage::Recorded => "recorded",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ArchiveError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "resolved" => Ok(Stage::Resolved),
            "planned" => Ok(Stage::Planned),
            "moved" => Ok(Stage::Moved),
            "published" => Ok(Stage::Published),
            "notified" => Ok(Stage::Notified),
            "recorded" => Ok(Stage::Recorded),
            _ => Err(ArchiveError::InvalidRow(format!("unknown stage {value:?}"))),
        }
    }
}

/// The operation running while an item is between two milestones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Resolving,
    Planning,
    Moving,
    Publishing,
    Notifying,
    Recording,
}

impl Step {
    pub fn after(reached: Option<Stage>) -> Step {
        match reached {
            None => Step::Resolving,
            Some(Stage::Resolved) => Step::Planning,
            Some(Stage::Planned) => Step::Moving,
            Some(Stage::Moved) => Step::Publishing,
            Some(Stage::Published) => Step::Notifying,
            Some(Stage::Notified) | Some(Stage::Recorded) => Step::Recording,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Step::Resolving => "resolving",
            Step::Planning => "planning",
            Step::Moving => "moving",
            Step::Publishing => "publishing",
            Step::Notifying => "notifying",
            Step::Recording => "recording",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagingItem {
    pub row: RowKey,
    pub source: Option<String>,
    pub fields: BTreeMap<String, String>,
    pub status: ItemStatus,
    pub stage: Option<Stage>,
    pub archive_path: Option<String>,
    pub url: Option<String>,
    pub last_error: Option<String>,
}

impl StagingItem {
    pub fn new(row: RowKey) -> Self {
        Self {
            row,
            source: None,
            fields: BTreeMap::new(),
            status: ItemStatus::Pending,
            stage: None,
            archive_path: None,
            url: None,
            last_error: None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CatalogNumber {
    prefix: Option<String>,
    number: String,
}

impl CatalogNumber {
    /// Accepts `BPBM12345`, `BPBM-12345`, `BPBM 12345` or `12345` for prefix `BPBM`.
    pub fn parse(raw: &str, prefix: Option<&str>) -> Result<Self, ArchiveError> {
        let trimmed = raw.trim();
        let mut number = trimmed;
        if let Some(prefix) = prefix {
            let upper = trimmed.to_ascii_uppercase();
            if upper.starts_with(&prefix.to_ascii_uppercase()) {
                number = trimmed[prefix.len()..].trim_start_matches([' ', '-', '_', '.']);
            }
        }
        let number = number.trim();
        let is_valid = !number.is_empty()
            && number
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-'));
        if !is_valid {
            return Err(ArchiveError::InvalidRow(format!(
                "invalid catalog number {raw:?}"
            )));
        }
        Ok(Self {
            prefix: prefix.map(|value| value.to_string()),
            number: number.to_string(),
        })
    }

    pub fn number(&self) -> &str {
        &self.number
    }
}

impl fmt::Display for CatalogNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{prefix}-{}", self.number),
            None => f.write_str(&self.number),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ImageRole(String);

impl ImageRole {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ImageRole {
    type Err = ArchiveError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase().replace(' ', "_");
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
        if !is_valid {
            return Err(ArchiveError::InvalidRow(format!("invalid image role {value:?}")));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Taxon {
    pub rank: String,
    pub name: String,
}

impl Taxon {
    pub fn new(rank: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            rank: rank.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TaxonomyPath(Vec<Taxon>);

impl TaxonomyPath {
    pub fn new(taxa: Vec<Taxon>) -> Result<Self, ArchiveError> {
        if taxa.is_empty() {
            return Err(ArchiveError::Planning("taxonomy path is empty".to_string()));
        }
        Ok(Self(taxa))
    }

    pub fn taxa(&self) -> &[Taxon] {
        &self.0
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|taxon| taxon.name.as_str())
    }
}

impl fmt::Display for TaxonomyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self.names().collect::<Vec<_>>().join("/");
        f.write_str(&joined)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpecimenIdentity {
    pub catalog_number: CatalogNumber,
    /// Part number within a catalogued lot, when the row was keyed by one.
    pub specimen_number: Option<String>,
    pub scientific_name: Option<String>,
    /// Identification qualifier such as `cf.` or `aff.`.
    pub qualifier: Option<String>,
    pub taxonomy: TaxonomyPath,
    pub role: ImageRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationPath {
    pub root: Utf8PathBuf,
    pub folder: Utf8PathBuf,
    pub file_name: String,
}

impl DestinationPath {
    pub fn relative(&self) -> Utf8PathBuf {
        self.folder.join(&self.file_name)
    }

    pub fn full(&self) -> Utf8PathBuf {
        self.root.join(self.relative())
    }

    pub fn dir(&self) -> Utf8PathBuf {
        self.root.join(&self.folder)
    }

    pub fn object_key(&self, prefix: Option<&str>) -> String {
        let relative = self
            .relative()
            .components()
            .map(|component| component.as_str().to_string())
            .collect::<Vec<_>>()
            .join("/");
        match prefix.map(|value| value.trim_matches('/')) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}/{relative}"),
            _ => relative,
        }
    }

    /// Rebuilds a destination from a path recorded in the ledger.
    pub fn from_recorded(root: &Utf8Path, recorded: &str) -> Option<Self> {
        let path = Utf8Path::new(recorded);
        let relative = path.strip_prefix(root).unwrap_or(path);
        if relative.is_absolute() {
            return None;
        }
        let file_name = relative.file_name()?.to_string();
        let folder = relative.parent()?.to_path_buf();
        Some(Self {
            root: root.to_path_buf(),
            folder,
            file_name,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedAsset {
    pub archive_path: String,
    pub object_key: String,
    pub url: String,
    pub uploaded_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeError {
    pub kind: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&ArchiveError> for OutcomeError {
    fn from(error: &ArchiveError) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingOutcome {
    pub row: RowKey,
    pub stage_reached: Option<Stage>,
    pub success: bool,
    pub already_archived: bool,
    pub archive_path: Option<String>,
    pub asset: Option<PublishedAsset>,
    pub error: Option<OutcomeError>,
}

impl ProcessingOutcome {
    pub fn new(row: RowKey) -> Self {
        Self {
            row,
            stage_reached: None,
            success: false,
            already_archived: false,
            archive_path: None,
            asset: None,
            error: None,
        }
    }

    pub fn reach(&mut self, stage: Stage) {
        self.stage_reached = Some(stage);
    }

    pub fn fail(mut self, error: &ArchiveError) -> Self {
        self.success = false;
        self.error = Some(OutcomeError::from(error));
        self
    }

    pub fn failed_step(&self) -> Option<Step> {
        (!self.success).then(|| Step::after(self.stage_reached))
    }

    pub fn status(&self) -> ItemStatus {
        if self.success {
            ItemStatus::Done
        } else {
            ItemStatus::Failed
        }
    }
}
