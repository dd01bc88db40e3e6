use async_trait::async_trait;
use reqwest::{Request, Response};

/// Executes prepared requests. Implemented by the plain client and by the
/// credential wrappers in [`crate::fetch::auth`], so a source can be handed
/// any stack of them.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
