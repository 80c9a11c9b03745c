use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use sha2::{Digest, Sha256};

use crate::config::{SpacesSettings, read_env};
use crate::error::ArchiveError;
use crate::http::{build_client, error_body, send_with_retries};
use crate::publisher::{ObjectStore, ObjectUpload};

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "s3";
const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// DigitalOcean Spaces over the S3 REST API, path-style, SigV4-signed.
pub struct SpacesHttpClient {
    client: Client,
    region: String,
    bucket: String,
    access_key: String,
    secret_key: String,
    public_base_url: String,
}

impl SpacesHttpClient {
    pub fn new(settings: &SpacesSettings) -> Result<Self, ArchiveError> {
        let client = build_client(Duration::from_secs(120), ArchiveError::Upload)?;
        Ok(Self {
            client,
            region: settings.region.clone(),
            bucket: settings.bucket.clone(),
            access_key: read_env(&settings.access_key_env)?,
            secret_key: read_env(&settings.secret_key_env)?,
            public_base_url: settings.public_base_url.clone(),
        })
    }

    fn host(&self) -> String {
        format!("{}.digitaloceanspaces.com", self.region)
    }

    fn canonical_uri(&self, key: &str) -> String {
        format!("/{}/{}", uri_encode(&self.bucket), uri_encode(key))
    }

    fn signed(
        &self,
        builder: RequestBuilder,
        method: &str,
        key: &str,
        payload_sha256: &str,
        extra_headers: &[(&str, &str)],
        now: DateTime<Utc>,
    ) -> Result<RequestBuilder, ArchiveError> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let host = self.host();

        let mut headers: Vec<(String, String)> = vec![
            ("host".to_string(), host),
            ("x-amz-content-sha256".to_string(), payload_sha256.to_string()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        for (name, value) in extra_headers {
            headers.push((name.to_ascii_lowercase(), value.trim().to_string()));
        }
        headers.sort();

        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{name}:{value}\n"))
            .collect();
        let signed_headers = headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_request = format!(
            "{method}\n{}\n\n{canonical_headers}\n{signed_headers}\n{payload_sha256}",
            self.canonical_uri(key)
        );

        let scope = format!("{date}/{}/{SERVICE}/aws4_request", self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );
        let key = signing_key(&self.secret_key, &date, &self.region, SERVICE)?;
        let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.access_key
        );

        let mut builder = builder.header("authorization", authorization);
        for (name, value) in headers.into_iter().filter(|(name, _)| name != "host") {
            builder = builder.header(name, value);
        }
        Ok(builder)
    }

    fn object_url(&self, key: &str) -> String {
        format!("https://{}{}", self.host(), self.canonical_uri(key))
    }
}

impl ObjectStore for SpacesHttpClient {
    fn put(&self, upload: &ObjectUpload) -> Result<String, ArchiveError> {
        let payload_sha256 = hex::encode(Sha256::digest(&upload.bytes));
        let url = self.object_url(&upload.key);
        let acl = if upload.public { "public-read" } else { "private" };
        let extra = [
            ("content-type", upload.content_type),
            ("x-amz-acl", acl),
            ("x-amz-meta-original-filename", upload.original_filename.as_str()),
        ];
        let response = send_with_retries(
            || {
                self.signed(
                    self.client.put(&url).body(upload.bytes.clone()),
                    "PUT",
                    &upload.key,
                    &payload_sha256,
                    &extra,
                    Utc::now(),
                )
            },
            ArchiveError::Upload,
        )?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = error_body(response, "Spaces upload failed");
            return Err(ArchiveError::Upload(format!("status {status}: {message}")));
        }
        Ok(self.url_for(&upload.key))
    }

    fn exists(&self, key: &str) -> Result<bool, ArchiveError> {
        let url = self.object_url(key);
        let response = send_with_retries(
            || {
                self.signed(
                    self.client.head(&url),
                    "HEAD",
                    key,
                    EMPTY_PAYLOAD_SHA256,
                    &[],
                    Utc::now(),
                )
            },
            ArchiveError::Upload,
        )?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(ArchiveError::Upload(format!(
                "HEAD {key} returned status {}",
                status.as_u16()
            ))),
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, uri_encode(key))
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|err| ArchiveError::Upload(err.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn signing_key(
    secret: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, ArchiveError> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

/// RFC 3986 encoding as S3 expects it; `/` separates key segments and is kept.
fn uri_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_key_matches_aws_example() {
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn uri_encode_keeps_separators() {
        assert_eq!(uri_encode("Mollusca/Conus marmoreus.jpg"), "Mollusca/Conus%20marmoreus.jpg");
        assert_eq!(uri_encode("a+b"), "a%2Bb");
    }
}
