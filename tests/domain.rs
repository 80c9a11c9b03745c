use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use specimen_archiver::domain::{
    CatalogNumber, DestinationPath, ImageRole, ItemStatus, ProcessingOutcome, RowKey, Stage,
    StagingItem, Step,
};
use specimen_archiver::error::ArchiveError;

#[test]
fn catalog_number_accepts_prefixed_and_bare_forms() {
    for raw in ["BPBM12345", "BPBM-12345", "bpbm 12345", "12345"] {
        let number = CatalogNumber::parse(raw, Some("BPBM")).unwrap();
        assert_eq!(number.number(), "12345", "{raw}");
        assert_eq!(number.to_string(), "BPBM-12345");
    }
}

#[test]
fn catalog_number_without_prefix_is_bare() {
    let number = CatalogNumber::parse(" 0042.1 ", None).unwrap();
    assert_eq!(number.to_string(), "0042.1");
}

#[test]
fn catalog_number_rejects_junk() {
    assert_matches!(CatalogNumber::parse("BPBM", Some("BPBM")), Err(ArchiveError::InvalidRow(_)));
    assert_matches!(CatalogNumber::parse("12/45", Some("BPBM")), Err(ArchiveError::InvalidRow(_)));
}

#[test]
fn status_parsing_is_lenient_about_case_and_separators() {
    assert_eq!("".parse::<ItemStatus>().unwrap(), ItemStatus::Pending);
    assert_eq!("In Progress".parse::<ItemStatus>().unwrap(), ItemStatus::InProgress);
    assert_eq!("in-progress".parse::<ItemStatus>().unwrap(), ItemStatus::InProgress);
    assert_eq!("DONE".parse::<ItemStatus>().unwrap(), ItemStatus::Done);
    assert_matches!("archived?".parse::<ItemStatus>(), Err(ArchiveError::InvalidRow(_)));
}

#[test]
fn only_unfinished_rows_are_eligible() {
    assert!(ItemStatus::Pending.is_eligible());
    assert!(ItemStatus::InProgress.is_eligible());
    assert!(ItemStatus::Failed.is_eligible());
    assert!(!ItemStatus::Done.is_eligible());
    assert!(!ItemStatus::Skipped.is_eligible());
}

#[test]
fn stages_are_ordered_along_the_pipeline() {
    assert!(Stage::Resolved < Stage::Planned);
    assert!(Stage::Published < Stage::Notified);
    assert_eq!("published".parse::<Stage>().unwrap(), Stage::Published);
    assert_eq!(Step::after(None), Step::Resolving);
    assert_eq!(Step::after(Some(Stage::Moved)), Step::Publishing);
    assert_eq!(Step::after(Some(Stage::Published)), Step::Notifying);
}

#[test]
fn image_role_is_normalised() {
    let role: ImageRole = " Dorsal View ".parse().unwrap();
    assert_eq!(role.as_str(), "dorsal_view");
    assert_matches!("a/b".parse::<ImageRole>(), Err(ArchiveError::InvalidRow(_)));
}

#[test]
fn staging_fields_are_trimmed_and_matched_without_case() {
    let mut item = StagingItem::new(RowKey(7));
    item.fields.insert("Catalog Number".to_string(), "  BPBM-1 ".to_string());
    item.fields.insert("Scientific Name".to_string(), "   ".to_string());
    assert_eq!(item.field("catalog number"), Some("BPBM-1"));
    assert_eq!(item.field("Scientific Name"), None);
    assert_eq!(item.field("Image Role"), None);
}

#[test]
fn recorded_destination_round_trips_through_the_ledger_path() {
    let root = Utf8Path::new("/srv/archive");
    let recorded = "/srv/archive/Mollusca/Conidae/BPBM-1_habitus.jpg";
    let destination = DestinationPath::from_recorded(root, recorded).unwrap();
    assert_eq!(destination.folder, Utf8PathBuf::from("Mollusca/Conidae"));
    assert_eq!(destination.file_name, "BPBM-1_habitus.jpg");
    assert_eq!(destination.full(), Utf8PathBuf::from(recorded));
    assert!(DestinationPath::from_recorded(root, "/elsewhere/x.jpg").is_none());
}

#[test]
fn outcome_reports_the_step_that_failed() {
    let mut outcome = ProcessingOutcome::new(RowKey(3));
    outcome.reach(Stage::Resolved);
    outcome.reach(Stage::Planned);
    let outcome = outcome.fail(&ArchiveError::Io("disk full".to_string()));
    assert_eq!(outcome.failed_step(), Some(Step::Moving));
    assert_eq!(outcome.status(), ItemStatus::Failed);
    let error = outcome.error.unwrap();
    assert_eq!(error.kind, "io_failure");
    assert!(!error.retryable);
}

#[test]
fn destination_serializes_its_paths_as_strings() {
    let destination = DestinationPath {
        root: Utf8PathBuf::from("/srv/archive"),
        folder: Utf8PathBuf::from("Mollusca/Conidae"),
        file_name: "BPBM-1_habitus.jpg".to_string(),
    };
    let value = serde_json::to_value(&destination).unwrap();
    assert_eq!(value["root"], "/srv/archive");
    assert_eq!(value["folder"], "Mollusca/Conidae");
    assert_eq!(value["file_name"], "BPBM-1_habitus.jpg");
}
