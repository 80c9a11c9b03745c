use std::fs::{self, File};
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::config::NamingPolicy;
use crate::domain::{DestinationPath, SpecimenIdentity};
use crate::error::ArchiveError;

const MAX_DISAMBIGUATOR: u32 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Fresh,
    AlreadyArchived,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub destination: DestinationPath,
    pub disposition: Disposition,
}

pub struct PathPlanner {
    archive_root: Utf8PathBuf,
    policy: NamingPolicy,
    unsafe_chars: Regex,
}

impl PathPlanner {
    pub fn new(archive_root: Utf8PathBuf, policy: NamingPolicy) -> Self {
        Self {
            archive_root,
            policy,
            unsafe_chars: Regex::new(r"[^A-Za-z0-9_\-]").unwrap(),
        }
    }

    pub fn archive_root(&self) -> &Utf8Path {
        &self.archive_root
    }

    /// Undisambiguated destination; depends only on the identity and the extension.
    pub fn destination_for(
        &self,
        identity: &SpecimenIdentity,
        extension: Option<&str>,
    ) -> Result<DestinationPath, ArchiveError> {
        self.candidate(identity, extension, 1)
    }

    pub fn plan(
        &self,
        identity: &SpecimenIdentity,
        source: &Utf8Path,
    ) -> Result<Plan, ArchiveError> {
        let extension = source.extension().map(|ext| ext.to_ascii_lowercase());
        let source_meta = fs::metadata(source.as_std_path())
            .map_err(|err| ArchiveError::Io(format!("stat {source}: {err}")))?;
        let mut source_digest = None;

        for attempt in 1..=MAX_DISAMBIGUATOR {
            let destination = self.candidate(identity, extension.as_deref(), attempt)?;
            let target = destination.full();
            let target_meta = match fs::metadata(target.as_std_path()) {
                Ok(meta) => meta,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    return Ok(Plan {
                        destination,
                        disposition: Disposition::Fresh,
                    });
                }
                Err(err) => return Err(ArchiveError::Io(format!("stat {target}: {err}"))),
            };
            if target_meta.len() != source_meta.len() {
                continue;
            }
            if source_digest.is_none() {
                source_digest = Some(content_digest(source)?);
            }
            if source_digest.as_deref() == Some(content_digest(&target)?.as_str()) {
                return Ok(Plan {
                    destination,
                    disposition: Disposition::AlreadyArchived,
                });
            }
        }

        Err(ArchiveError::Planning(format!(
            "more than {MAX_DISAMBIGUATOR} distinct files named for {} {}",
            identity.catalog_number, identity.role
        )))
    }

    fn candidate(
        &self,
        identity: &SpecimenIdentity,
        extension: Option<&str>,
        attempt: u32,
    ) -> Result<DestinationPath, ArchiveError> {
        let mut folder = Utf8PathBuf::new();
        if self.policy.role_folder {
            folder.push(self.segment("role", identity.role.as_str())?);
        }
        let taxa = identity.taxonomy.taxa();
        for (idx, taxon) in taxa.iter().enumerate() {
            let mut name = self.segment(&taxon.rank, &taxon.name)?;
            if idx + 1 == taxa.len() {
                // "cf." and "aff." identifications are kept apart from confirmed ones.
                let qualifier = identity
                    .qualifier
                    .as_deref()
                    .map(|qualifier| clean_segment(&self.unsafe_chars, qualifier))
                    .filter(|qualifier| !qualifier.is_empty());
                if let Some(qualifier) = qualifier {
                    name.push('_');
                    name.push_str(&qualifier);
                }
            }
            folder.push(name);
        }

        let catalog = self.segment("catalog number", &identity.catalog_number.to_string())?;
        let role = self.segment("role", identity.role.as_str())?;
        let mut file_name = match identity.specimen_number.as_deref() {
            Some(specimen) => {
                let specimen = self.segment("specimen number", specimen)?;
                format!("{catalog}_{specimen}_{role}")
            }
            None => format!("{catalog}_{role}"),
        };
        if attempt > 1 {
            file_name.push_str(&format!("-{attempt}"));
        }
        if let Some(ext) = extension.filter(|ext| !ext.is_empty()) {
            file_name.push('.');
            file_name.push_str(ext);
        }

        Ok(DestinationPath {
            root: self.archive_root.clone(),
            folder,
            file_name,
        })
    }

    /// Where the outreach duplicate of an archived file goes: the same layout
    /// under the outreach folder.
    pub fn outreach_copy(&self, destination: &DestinationPath) -> DestinationPath {
        DestinationPath {
            root: self.archive_root.clone(),
            folder: Utf8Path::new(&self.policy.outreach_folder).join(&destination.folder),
            file_name: destination.file_name.clone(),
        }
    }

    fn segment(&self, label: &str, value: &str) -> Result<String, ArchiveError> {
        let cleaned = clean_segment(&self.unsafe_chars, value);
        if cleaned.is_empty() {
            return Err(ArchiveError::Planning(format!(
                "{label} {value:?} is empty after cleaning"
            )));
        }
        Ok(cleaned)
    }
}

/// Folds accents to ASCII, turns whitespace into underscores and drops
/// anything `unsafe_chars` matches.
pub fn clean_segment(unsafe_chars: &Regex, value: &str) -> String {
    let folded: String = value.trim().nfkd().filter(char::is_ascii).collect();
    let spaced = folded.replace(char::is_whitespace, "_");
    unsafe_chars.replace_all(&spaced, "").into_owned()
}

pub fn content_digest(path: &Utf8Path) -> Result<String, ArchiveError> {
    let mut file = File::open(path.as_std_path())
        .map_err(|err| ArchiveError::Io(format!("open {path}: {err}")))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .map_err(|err| ArchiveError::Io(format!("read {path}: {err}")))?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_segment_strips_punctuation() {
        let re = Regex::new(r"[^A-Za-z0-9_\-]").unwrap();
        assert_eq!(clean_segment(&re, " Conus  marmoreus "), "Conus__marmoreus");
        assert_eq!(clean_segment(&re, "O'ahu (east)"), "Oahu_east");
        assert_eq!(clean_segment(&re, "BPBM-12345"), "BPBM-12345");
        assert_eq!(clean_segment(&re, "..."), "");
    }

    #[test]
    fn clean_segment_folds_diacritics() {
        let re = Regex::new(r"[^A-Za-z0-9_\-]").unwrap();
        assert_eq!(clean_segment(&re, "Pāhoa"), "Pahoa");
        assert_eq!(clean_segment(&re, "Ka\u{02bb}ū"), "Kau");
        assert_eq!(clean_segment(&re, "Müller & Söhne"), "Muller__Sohne");
    }
}
