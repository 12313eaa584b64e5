use async_trait::async_trait;
use reqwest::{Request, Response};

/// Executes HTTP requests. Wrappers such as [`super::WithUserAgent`] decorate
/// an inner client; tests substitute their own implementation.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
