use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use specimen_archiver::domain::DestinationPath;
use specimen_archiver::error::ArchiveError;
use specimen_archiver::mover::{MoveMethod, Mover};

struct Dirs {
    _temp: tempfile::TempDir,
    staging: Utf8PathBuf,
    archive: Utf8PathBuf,
}

fn dirs() -> Dirs {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let staging = root.join("staging");
    let archive = root.join("archive");
    fs::create_dir_all(staging.as_std_path()).unwrap();
    Dirs {
        _temp: temp,
        staging,
        archive,
    }
}

fn destination(archive: &Utf8PathBuf, file_name: &str) -> DestinationPath {
    DestinationPath {
        root: archive.clone(),
        folder: Utf8PathBuf::from("Mollusca/Gastropoda"),
        file_name: file_name.to_string(),
    }
}

#[test]
fn relocate_creates_folders_and_removes_source() {
    let dirs = dirs();
    let source = dirs.staging.join("img001.jpg");
    fs::write(source.as_std_path(), b"pixels").unwrap();
    let target = destination(&dirs.archive, "BPBM-1_habitus.jpg");

    let method = Mover::new(dirs.staging.clone())
        .relocate(&source, &target)
        .unwrap();

    assert_eq!(method, MoveMethod::Link);
    assert!(!source.as_std_path().exists());
    assert_eq!(fs::read(target.full().as_std_path()).unwrap(), b"pixels");
}

#[test]
fn existing_destination_is_never_overwritten() {
    let dirs = dirs();
    let source = dirs.staging.join("img001.jpg");
    fs::write(source.as_std_path(), b"new").unwrap();
    let target = destination(&dirs.archive, "BPBM-1_habitus.jpg");
    fs::create_dir_all(target.dir().as_std_path()).unwrap();
    fs::write(target.full().as_std_path(), b"old").unwrap();

    let result = Mover::new(dirs.staging.clone()).relocate(&source, &target);

    assert_matches!(result, Err(ArchiveError::MoveConflict(_)));
    assert_eq!(fs::read(target.full().as_std_path()).unwrap(), b"old");
    assert!(source.as_std_path().exists());
}

#[test]
fn missing_source_is_an_io_failure() {
    let dirs = dirs();
    let source = dirs.staging.join("gone.jpg");
    let target = destination(&dirs.archive, "BPBM-1_habitus.jpg");

    let result = Mover::new(dirs.staging.clone()).relocate(&source, &target);

    assert_matches!(result, Err(ArchiveError::Io(_)));
    assert!(!target.full().as_std_path().exists());
}

#[test]
fn emptied_subfolder_is_pruned_but_busy_one_is_kept() {
    let dirs = dirs();
    let mover = Mover::new(dirs.staging.clone());
    let lone = dirs.staging.join("tray-1/img001.jpg");
    let busy = dirs.staging.join("tray-2/img002.jpg");
    for path in [&lone, &busy] {
        fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
        fs::write(path.as_std_path(), path.as_str()).unwrap();
    }
    fs::write(dirs.staging.join("tray-2/img003.jpg").as_std_path(), b"x").unwrap();

    mover
        .relocate(&lone, &destination(&dirs.archive, "a.jpg"))
        .unwrap();
    mover
        .relocate(&busy, &destination(&dirs.archive, "b.jpg"))
        .unwrap();

    assert!(!dirs.staging.join("tray-1").as_std_path().exists());
    assert!(dirs.staging.join("tray-2").as_std_path().exists());
    assert!(dirs.staging.as_std_path().exists());
}

#[test]
fn duplicate_copies_and_keeps_the_original() {
    let dirs = dirs();
    let archived = destination(&dirs.archive, "BPBM-1_habitus.jpg");
    fs::create_dir_all(archived.dir().as_std_path()).unwrap();
    fs::write(archived.full().as_std_path(), b"shell").unwrap();
    let copy = DestinationPath {
        root: dirs.archive.clone(),
        folder: Utf8PathBuf::from("Outreach/Mollusca/Gastropoda"),
        file_name: "BPBM-1_habitus.jpg".to_string(),
    };
    let mover = Mover::new(dirs.staging.clone());

    assert!(mover.duplicate(&archived.full(), &copy).unwrap());
    assert!(!mover.duplicate(&archived.full(), &copy).unwrap());

    assert_eq!(fs::read(copy.full().as_std_path()).unwrap(), b"shell");
    assert_eq!(fs::read(archived.full().as_std_path()).unwrap(), b"shell");
}

#[test]
fn duplicate_never_overwrites_a_different_file() {
    let dirs = dirs();
    let archived = destination(&dirs.archive, "BPBM-1_habitus.jpg");
    fs::create_dir_all(archived.dir().as_std_path()).unwrap();
    fs::write(archived.full().as_std_path(), b"shell").unwrap();
    let copy = DestinationPath {
        root: dirs.archive.join("Outreach"),
        folder: Utf8PathBuf::from("Mollusca"),
        file_name: "BPBM-1_habitus.jpg".to_string(),
    };
    fs::create_dir_all(copy.dir().as_std_path()).unwrap();
    fs::write(copy.full().as_std_path(), b"other").unwrap();

    let result = Mover::new(dirs.staging.clone()).duplicate(&archived.full(), &copy);

    assert_matches!(result, Err(ArchiveError::MoveConflict(_)));
    assert_eq!(fs::read(copy.full().as_std_path()).unwrap(), b"other");
}
