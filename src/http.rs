use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::ArchiveError;

const MAX_RETRIES: usize = 3;
const BASE_DELAY_MS: u64 = 200;

pub fn build_client(
    timeout: Duration,
    on_error: fn(String) -> ArchiveError,
) -> Result<Client, ArchiveError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("specimen-archiver/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| on_error(err.to_string()))?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|err| on_error(err.to_string()))
}

/// Sends a request, retrying transient statuses and connection errors.
/// `make_req` is called once per attempt so signed headers stay fresh.
pub fn send_with_retries<F>(
    mut make_req: F,
    on_error: fn(String) -> ArchiveError,
) -> Result<Response, ArchiveError>
where
    F: FnMut() -> Result<RequestBuilder, ArchiveError>,
{
    let mut attempt = 0usize;
    loop {
        let response = make_req()?.send();
        match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if attempt < MAX_RETRIES && is_retryable_status(status) {
                    backoff(attempt);
                    attempt += 1;
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if attempt < MAX_RETRIES && is_retryable_error(&err) {
                    backoff(attempt);
                    attempt += 1;
                    continue;
                }
                return Err(on_error(err.to_string()));
            }
        }
    }
}

pub fn error_body(response: Response, fallback: &str) -> String {
    response
        .text()
        .ok()
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn backoff(attempt: usize) {
    let delay = BASE_DELAY_MS * (attempt as u64 + 1);
    thread::sleep(Duration::from_millis(delay));
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
