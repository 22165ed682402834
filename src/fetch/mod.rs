//! Thin HTTP layer used by the crawler.

mod basic;

pub use basic::BasicClient;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Request, Response};

/// Abstraction over request execution so tests and alternative transports
/// can stand in for a real HTTP client.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}

/// Performs a GET request for `url` and returns the response body.
///
/// Non-success status codes are errors; callers decide whether to retry the
/// stop or skip it.
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: reqwest::Url) -> Result<Vec<u8>> {
    let req = Request::new(reqwest::Method::GET, url);
    let resp = client.execute(req).await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}
