use tracing::{debug, error};

use crate::domain::{DestinationPath, ItemStatus, ProcessingOutcome, RowKey, Stage};
use crate::error::ArchiveError;
use crate::sheets::{LedgerUpdate, StagingSheet};

/// Writes item outcomes back to their staging rows.
pub struct LedgerWriter<S: StagingSheet> {
    sheet: S,
}

impl<S: StagingSheet> LedgerWriter<S> {
    pub fn new(sheet: S) -> Self {
        Self { sheet }
    }

    pub fn sheet(&self) -> &S {
        &self.sheet
    }

    /// Records where the file is about to go before it is moved.
    pub fn mark_in_progress(
        &self,
        row: RowKey,
        destination: &DestinationPath,
    ) -> Result<(), ArchiveError> {
        let update = LedgerUpdate {
            status: ItemStatus::InProgress,
            stage: Some(Stage::Planned),
            archive_path: Some(destination.full().to_string()),
            url: None,
            error: None,
        };
        self.sheet.write_row(row, &update)
    }

    pub fn record(&self, outcome: &ProcessingOutcome) -> Result<(), ArchiveError> {
        let update = update_for(outcome);
        debug!(row = %outcome.row, status = %update.status, "writing ledger row");
        self.sheet.write_row(outcome.row, &update).inspect_err(|err| {
            error!(row = %outcome.row, error = %err, "ledger write failed");
        })
    }
}

pub fn update_for(outcome: &ProcessingOutcome) -> LedgerUpdate {
    let stage = if outcome.success {
        Some(Stage::Notified)
    } else {
        outcome.stage_reached
    };
    LedgerUpdate {
        status: outcome.status(),
        stage,
        archive_path: outcome
            .asset
            .as_ref()
            .map(|asset| asset.archive_path.clone())
            .or_else(|| outcome.archive_path.clone()),
        url: outcome.asset.as_ref().map(|asset| asset.url.clone()),
        error: outcome
            .error
            .as_ref()
            .map(|error| format!("{}: {}", error.kind, error.message)),
    }
}
