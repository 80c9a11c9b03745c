use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use specimen_archiver::config::NamingPolicy;
use specimen_archiver::domain::{CatalogNumber, SpecimenIdentity, Taxon, TaxonomyPath};
use specimen_archiver::error::ArchiveError;
use specimen_archiver::planner::{Disposition, PathPlanner, content_digest};

fn identity(taxa: &[(&str, &str)], role: &str) -> SpecimenIdentity {
    SpecimenIdentity {
        catalog_number: CatalogNumber::parse("BPBM12345", Some("BPBM")).unwrap(),
        specimen_number: None,
        scientific_name: Some("Conus conus".to_string()),
        qualifier: None,
        taxonomy: TaxonomyPath::new(
            taxa.iter()
                .map(|(rank, name)| Taxon::new(*rank, *name))
                .collect(),
        )
        .unwrap(),
        role: role.parse().unwrap(),
    }
}

fn conus() -> SpecimenIdentity {
    identity(
        &[
            ("Phylum", "Mollusca"),
            ("Class", "Gastropoda"),
            ("Family", "Conidae"),
            ("Genus", "Conus"),
            ("Species", "conus"),
        ],
        "habitus",
    )
}

fn workspace() -> (tempfile::TempDir, Utf8PathBuf, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let staging = root.join("staging");
    let archive = root.join("archive");
    fs::create_dir_all(staging.as_std_path()).unwrap();
    (temp, staging, archive)
}

#[test]
fn destination_follows_taxonomy_role_and_catalog_number() {
    let planner = PathPlanner::new(Utf8PathBuf::from("archive"), NamingPolicy::default());
    let destination = planner.destination_for(&conus(), Some("jpg")).unwrap();
    assert_eq!(
        destination.full(),
        Utf8PathBuf::from("archive/Mollusca/Gastropoda/Conidae/Conus/conus/BPBM-12345_habitus.jpg")
    );
    assert_eq!(
        destination.object_key(None),
        "Mollusca/Gastropoda/Conidae/Conus/conus/BPBM-12345_habitus.jpg"
    );
    assert_eq!(
        destination.object_key(Some("/images/")),
        "images/Mollusca/Gastropoda/Conidae/Conus/conus/BPBM-12345_habitus.jpg"
    );
}

#[test]
fn destination_is_stable_across_calls() {
    let planner = PathPlanner::new(Utf8PathBuf::from("archive"), NamingPolicy::default());
    let first = planner.destination_for(&conus(), Some("tif")).unwrap();
    let second = planner.destination_for(&conus(), Some("tif")).unwrap();
    assert_eq!(first, second);
}

#[test]
fn role_folder_is_optional() {
    let policy = NamingPolicy {
        role_folder: true,
        ..NamingPolicy::default()
    };
    let planner = PathPlanner::new(Utf8PathBuf::from("archive"), policy);
    let destination = planner.destination_for(&conus(), Some("jpg")).unwrap();
    assert_eq!(
        destination.relative(),
        Utf8PathBuf::from("habitus/Mollusca/Gastropoda/Conidae/Conus/conus/BPBM-12345_habitus.jpg")
    );
}

#[test]
fn folder_names_are_cleaned() {
    let planner = PathPlanner::new(Utf8PathBuf::from("archive"), NamingPolicy::default());
    let identity = identity(&[("Family", "Achatinellidae"), ("Genus", "Partulina (s.s.)")], "dorsal view");
    let destination = planner.destination_for(&identity, Some("jpg")).unwrap();
    assert_eq!(
        destination.relative(),
        Utf8PathBuf::from("Achatinellidae/Partulina_ss/BPBM-12345_dorsal_view.jpg")
    );
}

#[test]
fn rank_that_cleans_to_nothing_is_a_planning_error() {
    let planner = PathPlanner::new(Utf8PathBuf::from("archive"), NamingPolicy::default());
    let identity = identity(&[("Family", "Conidae"), ("Genus", "??")], "habitus");
    assert_matches!(
        planner.destination_for(&identity, Some("jpg")),
        Err(ArchiveError::Planning(_))
    );
}

#[test]
fn empty_taxonomy_is_rejected() {
    assert_matches!(TaxonomyPath::new(Vec::new()), Err(ArchiveError::Planning(_)));
}

#[test]
fn free_destination_is_fresh() {
    let (_temp, staging, archive) = workspace();
    let source = staging.join("IMG001.JPG");
    fs::write(source.as_std_path(), b"bytes").unwrap();
    let planner = PathPlanner::new(archive, NamingPolicy::default());

    let plan = planner.plan(&conus(), &source).unwrap();

    assert_eq!(plan.disposition, Disposition::Fresh);
    assert_eq!(plan.destination.file_name, "BPBM-12345_habitus.jpg");
}

#[test]
fn occupied_destination_gets_next_free_suffix() {
    let (_temp, staging, archive) = workspace();
    let planner = PathPlanner::new(archive, NamingPolicy::default());
    let base = planner.destination_for(&conus(), Some("jpg")).unwrap();
    fs::create_dir_all(base.dir().as_std_path()).unwrap();
    fs::write(base.full().as_std_path(), b"first").unwrap();
    fs::write(base.dir().join("BPBM-12345_habitus-2.jpg").as_std_path(), b"second").unwrap();
    let source = staging.join("img.jpg");
    fs::write(source.as_std_path(), b"third").unwrap();

    let plan = planner.plan(&conus(), &source).unwrap();

    assert_eq!(plan.disposition, Disposition::Fresh);
    assert_eq!(plan.destination.file_name, "BPBM-12345_habitus-3.jpg");
}

#[test]
fn identical_content_is_already_archived() {
    let (_temp, staging, archive) = workspace();
    let planner = PathPlanner::new(archive, NamingPolicy::default());
    let base = planner.destination_for(&conus(), Some("jpg")).unwrap();
    fs::create_dir_all(base.dir().as_std_path()).unwrap();
    fs::write(base.full().as_std_path(), b"other").unwrap();
    fs::write(base.dir().join("BPBM-12345_habitus-2.jpg").as_std_path(), b"same").unwrap();
    let source = staging.join("img.jpg");
    fs::write(source.as_std_path(), b"same").unwrap();

    let plan = planner.plan(&conus(), &source).unwrap();

    assert_eq!(plan.disposition, Disposition::AlreadyArchived);
    assert_eq!(plan.destination.file_name, "BPBM-12345_habitus-2.jpg");
}

#[test]
fn same_size_different_bytes_is_not_identical() {
    let (_temp, staging, archive) = workspace();
    let planner = PathPlanner::new(archive, NamingPolicy::default());
    let base = planner.destination_for(&conus(), Some("jpg")).unwrap();
    fs::create_dir_all(base.dir().as_std_path()).unwrap();
    fs::write(base.full().as_std_path(), b"abcd").unwrap();
    let source = staging.join("img.jpg");
    fs::write(source.as_std_path(), b"abce").unwrap();

    let plan = planner.plan(&conus(), &source).unwrap();

    assert_eq!(plan.disposition, Disposition::Fresh);
    assert_eq!(plan.destination.file_name, "BPBM-12345_habitus-2.jpg");
}

#[test]
fn digest_is_sha256_hex() {
    let (_temp, staging, _archive) = workspace();
    let path = staging.join("empty.jpg");
    fs::write(path.as_std_path(), b"").unwrap();
    assert_eq!(
        content_digest(&path).unwrap(),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

#[test]
fn qualifier_and_specimen_number_extend_the_names() {
    let planner = PathPlanner::new(Utf8PathBuf::from("archive"), NamingPolicy::default());
    let identity = SpecimenIdentity {
        specimen_number: Some("S 12".to_string()),
        qualifier: Some("aff.".to_string()),
        ..conus()
    };
    let destination = planner.destination_for(&identity, Some("jpg")).unwrap();
    assert_eq!(
        destination.relative(),
        Utf8PathBuf::from("Mollusca/Gastropoda/Conidae/Conus/conus_aff/BPBM-12345_S_12_habitus.jpg")
    );
}

#[test]
fn outreach_copy_mirrors_the_archive_layout() {
    let planner = PathPlanner::new(Utf8PathBuf::from("archive"), NamingPolicy::default());
    let destination = planner.destination_for(&conus(), Some("jpg")).unwrap();
    let copy = planner.outreach_copy(&destination);
    assert_eq!(
        copy.full(),
        Utf8PathBuf::from("archive/Outreach/Mollusca/Gastropoda/Conidae/Conus/conus/BPBM-12345_habitus.jpg")
    );
}

#[test]
fn accented_place_names_are_folded() {
    let planner = PathPlanner::new(Utf8PathBuf::from("archive"), NamingPolicy::default());
    let identity = identity(&[("Family", "Helicinidae"), ("Locality", "Pāhoa")], "habitus");
    let destination = planner.destination_for(&identity, Some("jpg")).unwrap();
    assert_eq!(destination.folder, Utf8PathBuf::from("Helicinidae/Pahoa"));
}
