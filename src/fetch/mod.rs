mod basic;
mod client;
mod header;
pub mod retry;

pub use basic::BasicClient;
pub use client::HttpClient;
pub use header::WithUserAgent;
pub use retry::{RetryPolicy, with_backoff};

use crate::source::FetchError;

/// Executes `req` and returns the body, mapping non-success statuses to
/// [`FetchError::Status`].
pub async fn fetch_bytes<C: HttpClient>(client: &C, req: reqwest::Request) -> Result<Vec<u8>, FetchError> {
    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(FetchError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.bytes().await?.to_vec())
}
