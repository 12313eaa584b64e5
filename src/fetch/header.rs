use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, USER_AGENT};

/// An [`HttpClient`] wrapper that identifies every request with a `User-Agent`.
///
/// Public Overpass instances ask clients to identify themselves; requests
/// without a descriptive agent are more likely to be throttled.
pub struct WithUserAgent<C> {
    pub inner: C,
    agent: HeaderValue,
}

impl<C> WithUserAgent<C> {
    /// Fails if `agent` contains characters not allowed in a header value.
    pub fn new(inner: C, agent: &str) -> anyhow::Result<Self> {
        Ok(Self {
            inner,
            agent: HeaderValue::from_str(agent)?,
        })
    }

    /// `<crate name>/<crate version>`.
    pub fn crate_default(inner: C) -> Self {
        Self {
            inner,
            agent: HeaderValue::from_static(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            )),
        }
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for WithUserAgent<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut().insert(USER_AGENT, self.agent.clone());
        self.inner.execute(req).await
    }
}
