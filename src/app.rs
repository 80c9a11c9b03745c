use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{CatalogClient, CatalogNotice};
use crate::config::ResolvedConfig;
use crate::domain::{
    DestinationPath, ItemStatus, ProcessingOutcome, PublishedAsset, RowKey, SpecimenIdentity,
    Stage, StagingItem, Step,
};
use crate::error::ArchiveError;
use crate::ledger::LedgerWriter;
use crate::lock::{LOCK_FILE, RunLock};
use crate::mover::Mover;
use crate::planner::{Disposition, PathPlanner};
use crate::publisher::{ObjectStore, Publisher};
use crate::resolver::{CuratorialDb, IdentityResolver};
use crate::sheets::StagingSheet;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub limit: Option<usize>,
    pub rows: Vec<u32>,
    pub break_lock: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedItem {
    pub row: RowKey,
    pub step: Step,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub total_rows: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub already_archived: usize,
    pub planned: usize,
    pub failed_by_stage: BTreeMap<String, usize>,
    pub remaining_pending: usize,
    pub remaining_staging_files: usize,
    pub failures: Vec<FailedItem>,
    pub cancelled: bool,
    pub dry_run: bool,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    fn record_failure(&mut self, row: RowKey, step: Step, kind: &str, message: &str) {
        *self
            .failed_by_stage
            .entry(step.as_str().to_string())
            .or_default() += 1;
        self.failures.push(FailedItem {
            row,
            step,
            kind: kind.to_string(),
            message: message.to_string(),
        });
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub total_rows: usize,
    pub by_status: BTreeMap<String, usize>,
    pub failed_by_stage: BTreeMap<String, usize>,
    pub remaining_staging_files: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    Batch { total: usize },
    Step(Step),
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub row: Option<RowKey>,
    pub kind: ProgressKind,
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Shared flag checked between items.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct App<D: CuratorialDb, S: StagingSheet, O: ObjectStore, C: CatalogClient> {
    staging_root: Utf8PathBuf,
    outreach_column: String,
    resolver: IdentityResolver<D>,
    planner: PathPlanner,
    mover: Mover,
    publisher: Publisher<O>,
    catalog: C,
    ledger: LedgerWriter<S>,
}

impl<D: CuratorialDb, S: StagingSheet, O: ObjectStore, C: CatalogClient> App<D, S, O, C> {
    pub fn new(config: &ResolvedConfig, db: D, sheet: S, store: O, catalog: C) -> Self {
        Self {
            staging_root: config.staging_root.clone(),
            outreach_column: config.sheets.columns.outreach_duplicate.clone(),
            resolver: IdentityResolver::new(
                db,
                config.sheets.columns.clone(),
                config.naming.clone(),
            ),
            planner: PathPlanner::new(config.archive_root.clone(), config.naming.clone()),
            mover: Mover::new(config.staging_root.clone()),
            publisher: Publisher::new(store, config.spaces.key_prefix.clone()),
            catalog,
            ledger: LedgerWriter::new(sheet),
        }
    }

    pub fn run(
        &self,
        options: &RunOptions,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, ArchiveError> {
        let _lock = if options.dry_run {
            None
        } else {
            Some(RunLock::acquire(&self.staging_root, options.break_lock)?)
        };

        let items = self.ledger.sheet().fetch_items()?;
        let batch = select_batch(&items, options);
        let mut summary = RunSummary {
            total_rows: items.len(),
            dry_run: options.dry_run,
            ..RunSummary::default()
        };
        info!(rows = items.len(), batch = batch.len(), dry_run = options.dry_run, "run started");
        sink.event(ProgressEvent {
            row: None,
            kind: ProgressKind::Batch { total: batch.len() },
            message: format!("phase=Batch; {} of {} rows eligible", batch.len(), items.len()),
            elapsed: None,
        });

        for (position, item) in batch.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(remaining = batch.len() - position, "run cancelled between items");
                summary.cancelled = true;
                break;
            }
            let started = Instant::now();
            let outcome = self.process_item(item, options.dry_run, sink);
            summary.processed += 1;

            if options.dry_run {
                self.tally_dry_run(&mut summary, &outcome, started.elapsed(), sink);
                continue;
            }

            let recorded = self.ledger.record(&outcome);
            self.tally(&mut summary, &outcome, recorded, started.elapsed(), sink);
        }

        let eligible = items.iter().filter(|item| item.status.is_eligible()).count();
        let attempted = if options.dry_run { 0 } else { summary.processed };
        summary.remaining_pending = eligible - attempted;
        summary.remaining_staging_files = count_staging_files(&self.staging_root);
        info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed(),
            remaining = summary.remaining_pending,
            "run finished"
        );
        Ok(summary)
    }

    pub fn status(&self) -> Result<StatusReport, ArchiveError> {
        status_report(self.ledger.sheet(), &self.staging_root)
    }

    fn process_item(
        &self,
        item: &StagingItem,
        dry_run: bool,
        sink: &dyn ProgressSink,
    ) -> ProcessingOutcome {
        let mut outcome = ProcessingOutcome::new(item.row);
        match self.advance(item, dry_run, &mut outcome, sink) {
            Ok(()) => outcome,
            Err(err) => outcome.fail(&err),
        }
    }

    fn advance(
        &self,
        item: &StagingItem,
        dry_run: bool,
        outcome: &mut ProcessingOutcome,
        sink: &dyn ProgressSink,
    ) -> Result<(), ArchiveError> {
        step(sink, item.row, Step::Resolving);
        let identity = self.resolver.resolve(item)?;
        outcome.reach(Stage::Resolved);

        if let Some(asset) = self.published_asset(item) {
            if dry_run {
                outcome.archive_path = Some(asset.archive_path);
                return Ok(());
            }
            info!(row = %item.row, "resuming at catalog notification");
            outcome.archive_path = Some(asset.archive_path.clone());
            outcome.asset = Some(asset);
            outcome.reach(Stage::Published);
            return self.notify(item.row, &identity, outcome, sink);
        }

        let source = self.source_path(item)?;
        if !source.as_std_path().exists() {
            let destination = self.recorded_destination(item).ok_or_else(|| {
                ArchiveError::Io(format!("staged file {source} not found"))
            })?;
            outcome.reach(Stage::Planned);
            outcome.archive_path = Some(destination.full().to_string());
            if dry_run {
                return Ok(());
            }
            info!(row = %item.row, path = %destination.full(), "staged file already moved, resuming");
            self.duplicate_for_outreach(item, &destination)?;
            outcome.reach(Stage::Moved);
            return self.publish(item.row, &identity, &destination, &source, true, outcome, sink);
        }

        step(sink, item.row, Step::Planning);
        let plan = self.planner.plan(&identity, &source)?;
        outcome.reach(Stage::Planned);
        outcome.archive_path = Some(plan.destination.full().to_string());
        if dry_run {
            return Ok(());
        }

        match plan.disposition {
            Disposition::AlreadyArchived => {
                info!(row = %item.row, path = %plan.destination.full(), "identical file already archived");
                outcome.already_archived = true;
                self.duplicate_for_outreach(item, &plan.destination)?;
                outcome.reach(Stage::Moved);
                self.publish(item.row, &identity, &plan.destination, &source, true, outcome, sink)
            }
            Disposition::Fresh => {
                step(sink, item.row, Step::Moving);
                self.ledger.mark_in_progress(item.row, &plan.destination)?;
                let method = self.mover.relocate(&source, &plan.destination)?;
                info!(row = %item.row, path = %plan.destination.full(), ?method, "file archived");
                self.duplicate_for_outreach(item, &plan.destination)?;
                outcome.reach(Stage::Moved);
                self.publish(item.row, &identity, &plan.destination, &source, false, outcome, sink)
            }
        }
    }

    /// Copies the archived file into the outreach folder when the row asks for it.
    fn duplicate_for_outreach(
        &self,
        item: &StagingItem,
        destination: &DestinationPath,
    ) -> Result<(), ArchiveError> {
        let wanted = item.field(&self.outreach_column).is_some_and(|value| {
            matches!(value.to_ascii_lowercase().as_str(), "yes" | "y" | "true")
        });
        if !wanted {
            return Ok(());
        }
        let copy = self.planner.outreach_copy(destination);
        if self.mover.duplicate(&destination.full(), &copy)? {
            info!(row = %item.row, path = %copy.full(), "outreach duplicate written");
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn publish(
        &self,
        row: RowKey,
        identity: &SpecimenIdentity,
        destination: &DestinationPath,
        source: &Utf8Path,
        reuse_existing: bool,
        outcome: &mut ProcessingOutcome,
        sink: &dyn ProgressSink,
    ) -> Result<(), ArchiveError> {
        step(sink, row, Step::Publishing);
        let original = source.file_name().unwrap_or(destination.file_name.as_str());
        let asset = if reuse_existing {
            self.publisher.publish_if_missing(destination, original)?
        } else {
            self.publisher.publish(destination, original)?
        };
        outcome.asset = Some(asset);
        outcome.reach(Stage::Published);
        self.notify(row, identity, outcome, sink)
    }

    fn notify(
        &self,
        row: RowKey,
        identity: &SpecimenIdentity,
        outcome: &mut ProcessingOutcome,
        sink: &dyn ProgressSink,
    ) -> Result<(), ArchiveError> {
        step(sink, row, Step::Notifying);
        let asset = outcome
            .asset
            .as_ref()
            .ok_or_else(|| ArchiveError::Notify("no published asset to announce".to_string()))?;
        self.catalog.notify(&CatalogNotice::new(identity, asset))?;
        outcome.reach(Stage::Notified);
        outcome.success = true;
        Ok(())
    }

    /// The upload a failed run already finished, when only the notification is left.
    fn published_asset(&self, item: &StagingItem) -> Option<PublishedAsset> {
        if item.status != ItemStatus::Failed || item.stage != Some(Stage::Published) {
            return None;
        }
        let url = item.url.clone()?;
        let destination = self.recorded_destination(item)?;
        Some(PublishedAsset {
            archive_path: destination.full().to_string(),
            object_key: self.publisher.object_key(&destination),
            url,
            uploaded_at: None,
        })
    }

    fn recorded_destination(&self, item: &StagingItem) -> Option<DestinationPath> {
        let recorded = item.archive_path.as_deref()?;
        let destination = DestinationPath::from_recorded(self.planner.archive_root(), recorded)?;
        destination
            .full()
            .as_std_path()
            .is_file()
            .then_some(destination)
    }

    fn source_path(&self, item: &StagingItem) -> Result<Utf8PathBuf, ArchiveError> {
        let raw = item
            .source
            .as_deref()
            .ok_or_else(|| ArchiveError::InvalidRow("no staged file named".to_string()))?;
        let relative = Utf8Path::new(raw);
        let stays_inside = relative
            .components()
            .all(|component| matches!(component, Utf8Component::Normal(_) | Utf8Component::CurDir));
        if !stays_inside {
            return Err(ArchiveError::InvalidRow(format!(
                "staged file {raw:?} must be relative to the staging folder"
            )));
        }
        Ok(self.staging_root.join(relative))
    }

    fn tally(
        &self,
        summary: &mut RunSummary,
        outcome: &ProcessingOutcome,
        recorded: Result<(), ArchiveError>,
        elapsed: Duration,
        sink: &dyn ProgressSink,
    ) {
        if let Err(err) = recorded {
            summary.record_failure(outcome.row, Step::Recording, err.kind(), &err.to_string());
            finished(sink, outcome.row, false, format!("ledger: {err}"), elapsed);
            return;
        }
        match (&outcome.error, outcome.failed_step()) {
            (Some(error), Some(failed_step)) => {
                warn!(row = %outcome.row, step = %failed_step, kind = %error.kind, error = %error.message, "item failed");
                summary.record_failure(outcome.row, failed_step, &error.kind, &error.message);
                finished(sink, outcome.row, false, format!("{failed_step}: {}", error.message), elapsed);
            }
            _ => {
                summary.succeeded += 1;
                if outcome.already_archived {
                    summary.already_archived += 1;
                }
                let url = outcome
                    .asset
                    .as_ref()
                    .map(|asset| asset.url.as_str())
                    .unwrap_or_default();
                info!(row = %outcome.row, %url, "item done");
                finished(sink, outcome.row, true, url.to_string(), elapsed);
            }
        }
    }

    fn tally_dry_run(
        &self,
        summary: &mut RunSummary,
        outcome: &ProcessingOutcome,
        elapsed: Duration,
        sink: &dyn ProgressSink,
    ) {
        match &outcome.error {
            Some(error) => {
                let failed_step = Step::after(outcome.stage_reached);
                summary.record_failure(outcome.row, failed_step, &error.kind, &error.message);
                finished(sink, outcome.row, false, error.message.clone(), elapsed);
            }
            None => {
                summary.planned += 1;
                let path = outcome.archive_path.clone().unwrap_or_default();
                info!(row = %outcome.row, %path, "planned");
                finished(sink, outcome.row, true, path, elapsed);
            }
        }
    }
}

pub fn status_report<S: StagingSheet>(
    sheet: &S,
    staging_root: &Utf8Path,
) -> Result<StatusReport, ArchiveError> {
    let items = sheet.fetch_items()?;
    let mut by_status = BTreeMap::new();
    let mut failed_by_stage = BTreeMap::new();
    for item in &items {
        *by_status.entry(item.status.to_string()).or_insert(0) += 1;
        if item.status == ItemStatus::Failed {
            let failed_step = Step::after(item.stage);
            *failed_by_stage.entry(failed_step.to_string()).or_insert(0) += 1;
        }
    }
    Ok(StatusReport {
        total_rows: items.len(),
        by_status,
        failed_by_stage,
        remaining_staging_files: count_staging_files(staging_root),
    })
}

fn select_batch<'a>(items: &'a [StagingItem], options: &RunOptions) -> Vec<&'a StagingItem> {
    let selected = items
        .iter()
        .filter(|item| item.status.is_eligible())
        .filter(|item| options.rows.is_empty() || options.rows.contains(&item.row.0));
    match options.limit {
        Some(limit) => selected.take(limit).collect(),
        None => selected.collect(),
    }
}

/// Regular files under the staging root, ignoring dot-files.
pub fn count_staging_files(root: &Utf8Path) -> usize {
    let Ok(entries) = fs::read_dir(root.as_std_path()) else {
        return 0;
    };
    let mut count = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name == LOCK_FILE {
            continue;
        }
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            if let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) {
                count += count_staging_files(&path);
            }
        } else if file_type.is_file() {
            count += 1;
        }
    }
    count
}

fn step(sink: &dyn ProgressSink, row: RowKey, step: Step) {
    sink.event(ProgressEvent {
        row: Some(row),
        kind: ProgressKind::Step(step),
        message: format!("phase={step}; {row}"),
        elapsed: None,
    });
}

fn finished(sink: &dyn ProgressSink, row: RowKey, ok: bool, message: String, elapsed: Duration) {
    sink.event(ProgressEvent {
        row: Some(row),
        kind: if ok {
            ProgressKind::Done
        } else {
            ProgressKind::Failed
        },
        message,
        elapsed: Some(elapsed),
    });
}
