use std::time::Duration;

use reqwest::blocking::Client;
use serde::Serialize;

use crate::config::{CatalogSettings, read_env};
use crate::domain::{PublishedAsset, SpecimenIdentity};
use crate::error::ArchiveError;
use crate::http::{build_client, error_body, send_with_retries};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogNotice {
    pub catalog_number: String,
    pub scientific_name: Option<String>,
    pub role: String,
    pub url: String,
    pub archive_path: String,
}

impl CatalogNotice {
    pub fn new(identity: &SpecimenIdentity, asset: &PublishedAsset) -> Self {
        Self {
            catalog_number: identity.catalog_number.to_string(),
            scientific_name: identity.scientific_name.clone(),
            role: identity.role.to_string(),
            url: asset.url.clone(),
            archive_path: asset.archive_path.clone(),
        }
    }
}

pub trait CatalogClient: Send + Sync {
    fn notify(&self, notice: &CatalogNotice) -> Result<(), ArchiveError>;
}

#[derive(Clone)]
pub struct CatalogHttpClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl CatalogHttpClient {
    pub fn new(settings: &CatalogSettings) -> Result<Self, ArchiveError> {
        let client = build_client(Duration::from_secs(30), ArchiveError::Notify)?;
        let api_key = settings.api_key_env.as_deref().map(read_env).transpose()?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_key,
        })
    }
}

impl CatalogClient for CatalogHttpClient {
    fn notify(&self, notice: &CatalogNotice) -> Result<(), ArchiveError> {
        let response = send_with_retries(
            || {
                let mut request = self.client.post(&self.endpoint).json(notice);
                if let Some(key) = &self.api_key {
                    request = request.bearer_auth(key);
                }
                Ok(request)
            },
            ArchiveError::Notify,
        )?;
        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(());
        }
        let message = error_body(response, "catalog request failed");
        match status {
            404 | 409 | 422 => Err(ArchiveError::Notify(format!(
                "catalog rejected {}: {message}",
                notice.catalog_number
            ))),
            _ => Err(ArchiveError::Notify(format!("status {status}: {message}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CatalogNumber, Taxon, TaxonomyPath};

    #[test]
    fn notice_uses_catalog_field_names() {
        let identity = SpecimenIdentity {
            catalog_number: CatalogNumber::parse("12345", Some("BPBM")).unwrap(),
            specimen_number: None,
            scientific_name: Some("Conus conus".to_string()),
            qualifier: None,
            taxonomy: TaxonomyPath::new(vec![Taxon::new("Genus", "Conus")]).unwrap(),
            role: "habitus".parse().unwrap(),
        };
        let asset = PublishedAsset {
            archive_path: "/archive/Conus/BPBM-12345_habitus.jpg".to_string(),
            object_key: "Conus/BPBM-12345_habitus.jpg".to_string(),
            url: "https://cdn.test/Conus/BPBM-12345_habitus.jpg".to_string(),
            uploaded_at: None,
        };

        let body = serde_json::to_value(CatalogNotice::new(&identity, &asset)).unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "catalogNumber": "BPBM-12345",
                "scientificName": "Conus conus",
                "role": "habitus",
                "url": "https://cdn.test/Conus/BPBM-12345_habitus.jpg",
                "archivePath": "/archive/Conus/BPBM-12345_habitus.jpg"
            })
        );
    }
}
