pub mod gitlab;
pub mod ratelimit;
pub mod retry;
#[cfg(test)]
pub(crate) mod test_server;

pub use gitlab::GitLabClient;
pub use ratelimit::RateLimiter;
pub use retry::{RetryPolicy, RetryingClient};

use crate::cancel::CancellationToken;
use crate::config::{Connection, ServerKind};
use crate::error::Result;
use crate::model::{BlameRange, Page, RemoteUser, Repository, TreeEntry};
use async_trait::async_trait;
use std::sync::Arc;

pub const PER_PAGE: u32 = 100;

/// The remote hosting service as seen by the aggregator.
///
/// Listings are paged by number starting at 1; `Page::next` is the following
/// page or `None` once exhausted. A missing resource is reported as
/// `StatError::NotFound`.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn list_users(&self, page: u32, cancel: &CancellationToken) -> Result<Page<RemoteUser>>;

    async fn list_repositories(
        &self,
        query: Option<&str>,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Page<Repository>>;

    async fn list_tree(
        &self,
        repo_id: u64,
        recursive: bool,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Page<TreeEntry>>;

    async fn file_blame(
        &self,
        repo_id: u64,
        path: &str,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<BlameRange>>;
}

/// Builds the client for the configured server. The retrying transport and
/// rate limiter belong to this client only.
pub fn connect(connection: &Connection) -> Result<Arc<dyn RemoteService>> {
    match connection.server {
        ServerKind::Gitlab => {
            let http = RetryingClient::new(GitLabClient::http_client(connection.timeout)?, connection.retry);
            let limiter = Arc::new(RateLimiter::new(connection.rate_limit));
            Ok(Arc::new(GitLabClient::new(
                connection.host.clone(),
                connection.token.clone(),
                http,
                limiter,
            )))
        }
    }
}
