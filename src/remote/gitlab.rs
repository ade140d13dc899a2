use super::{RateLimiter, RemoteService, RetryingClient, PER_PAGE};
use crate::cancel::CancellationToken;
use crate::error::{Result, StatError};
use crate::model::{BlameRange, Page, RemoteUser, Repository, TreeEntry};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

const API_PREFIX: [&str; 2] = ["api", "v4"];
const NEXT_PAGE_HEADER: &str = "x-next-page";
const TOKEN_HEADER: &str = "PRIVATE-TOKEN";

/// GitLab REST v4 client.
#[derive(Debug, Clone)]
pub struct GitLabClient {
    host: Url,
    token: String,
    http: RetryingClient,
    limiter: Arc<RateLimiter>,
}

impl GitLabClient {
    pub fn new(host: Url, token: impl Into<String>, http: RetryingClient, limiter: Arc<RateLimiter>) -> Self {
        Self {
            host,
            token: token.into(),
            http,
            limiter,
        }
    }

    pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(StatError::from)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.host.clone();
        url.path_segments_mut()
            .map_err(|_| StatError::InvalidHost(self.host.to_string(), "cannot be a base URL".to_string()))?
            .pop_if_empty()
            .extend(API_PREFIX)
            .extend(segments);
        Ok(url)
    }

    fn paged(&self, segments: &[&str], page: u32) -> Result<Url> {
        let mut url = self.endpoint(segments)?;
        url.query_pairs_mut()
            .append_pair("per_page", &PER_PAGE.to_string())
            .append_pair("page", &page.to_string());
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        cancel: &CancellationToken,
    ) -> Result<(T, Option<u32>)> {
        self.limiter.wait(cancel).await?;
        trace!("GET {url}");

        let response = self
            .http
            .send(
                |client| {
                    let request = client.get(url.clone());
                    if self.token.is_empty() {
                        request
                    } else {
                        request.header(TOKEN_HEADER, self.token.as_str())
                    }
                },
                cancel,
            )
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StatError::NotFound(url.path().to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StatError::Remote {
                status: status.as_u16(),
                url: url.to_string(),
                message,
            });
        }

        let next = next_page(response.headers());
        let body = tokio::select! {
            body = response.json::<T>() => body?,
            _ = cancel.cancelled() => return Err(StatError::Cancelled),
        };
        Ok((body, next))
    }
}

fn next_page(headers: &HeaderMap) -> Option<u32> {
    headers
        .get(NEXT_PAGE_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

#[async_trait]
impl RemoteService for GitLabClient {
    async fn list_users(&self, page: u32, cancel: &CancellationToken) -> Result<Page<RemoteUser>> {
        let url = self.paged(&["users"], page)?;
        let (items, next) = self.get_json(url, cancel).await?;
        Ok(Page { items, next })
    }

    async fn list_repositories(
        &self,
        query: Option<&str>,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Page<Repository>> {
        let mut url = self.paged(&["projects"], page)?;
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.query_pairs_mut().append_pair("search", query);
        }
        let (items, next) = self.get_json(url, cancel).await?;
        Ok(Page { items, next })
    }

    async fn list_tree(
        &self,
        repo_id: u64,
        recursive: bool,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Page<TreeEntry>> {
        let id = repo_id.to_string();
        let mut url = self.paged(&["projects", &id, "repository", "tree"], page)?;
        url.query_pairs_mut().append_pair("recursive", if recursive { "true" } else { "false" });
        let (items, next) = self.get_json(url, cancel).await?;
        Ok(Page { items, next })
    }

    async fn file_blame(
        &self,
        repo_id: u64,
        path: &str,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<BlameRange>> {
        let id = repo_id.to_string();
        let mut url = self.endpoint(&["projects", &id, "repository", "files", path, "blame"])?;
        url.query_pairs_mut().append_pair("ref", reference);
        let (ranges, _) = self.get_json(url, cancel).await?;
        Ok(ranges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::test_server::{response, serve};
    use crate::remote::RetryPolicy;
    use reqwest::header::HeaderValue;

    fn client(host: &str) -> GitLabClient {
        GitLabClient::new(
            Url::parse(host).unwrap(),
            "secret",
            RetryingClient::new(reqwest::Client::new(), RetryPolicy::default()),
            Arc::new(RateLimiter::unlimited()),
        )
    }

    fn fast_client(host: &str, token: &str) -> GitLabClient {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        };
        GitLabClient::new(
            Url::parse(host).unwrap(),
            token,
            RetryingClient::new(reqwest::Client::new(), policy),
            Arc::new(RateLimiter::unlimited()),
        )
    }

    #[tokio::test]
    async fn tree_page_follows_next_page_header_after_a_retry() {
        let (base, requests) = serve(vec![
            response("503 Service Unavailable", &[], ""),
            response(
                "200 OK",
                &[("X-Next-Page", "2")],
                r#"[{"id":"a1","name":"a.go","type":"blob","path":"a.go","mode":"100644"}]"#,
            ),
        ])
        .await;
        let client = fast_client(&base, "tok");

        let page = client.list_tree(7, true, 1, &CancellationToken::new()).await.unwrap();
        assert_eq!(page.next, Some(2));
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].path, "a.go");

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        for request in requests.iter() {
            assert!(request.starts_with("get /api/v4/projects/7/repository/tree?"), "{request}");
            assert!(request.contains("recursive=true"), "{request}");
            assert!(request.contains("private-token: tok"), "{request}");
        }
    }

    #[tokio::test]
    async fn missing_resource_is_not_found() {
        let (base, requests) = serve(vec![response("404 Not Found", &[], r#"{"message":"404 Tree Not Found"}"#)]).await;
        let client = fast_client(&base, "tok");

        let err = client.list_tree(7, true, 2, &CancellationToken::new()).await.unwrap_err();
        assert!(err.is_not_found(), "{err}");
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn last_page_has_no_cursor() {
        let (base, _) = serve(vec![response("200 OK", &[("X-Next-Page", "")], r#"[{"id":1,"username":"alice","email":"alice@x.com"}]"#)]).await;
        let client = fast_client(&base, "tok");

        let page = client.list_users(1, &CancellationToken::new()).await.unwrap();
        assert_eq!(page.next, None);
        assert_eq!(page.items[0].username, "alice");
    }

    #[tokio::test]
    async fn other_failures_carry_the_status() {
        let (base, _) = serve(vec![response("403 Forbidden", &[], r#"{"message":"403 Forbidden"}"#)]).await;
        let client = fast_client(&base, "tok");

        let err = client.list_repositories(Some("app"), 1, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, StatError::Remote { status: 403, .. }), "{err}");
    }

    #[test]
    fn builds_paged_endpoints() {
        let url = client("https://gitlab.example.com").paged(&["users"], 3).unwrap();
        assert_eq!(url.as_str(), "https://gitlab.example.com/api/v4/users?per_page=100&page=3");
    }

    #[test]
    fn keeps_host_sub_path() {
        let url = client("https://example.com/gitlab/").endpoint(&["projects"]).unwrap();
        assert_eq!(url.as_str(), "https://example.com/gitlab/api/v4/projects");
    }

    #[test]
    fn file_paths_are_one_encoded_segment() {
        let url = client("https://gitlab.example.com")
            .endpoint(&["projects", "42", "repository", "files", "src/main.go", "blame"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://gitlab.example.com/api/v4/projects/42/repository/files/src%2Fmain.go/blame"
        );
    }

    #[test]
    fn parses_next_page_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(next_page(&headers), None);
        headers.insert(NEXT_PAGE_HEADER, HeaderValue::from_static(""));
        assert_eq!(next_page(&headers), None);
        headers.insert(NEXT_PAGE_HEADER, HeaderValue::from_static("4"));
        assert_eq!(next_page(&headers), Some(4));
    }

    #[test]
    fn decodes_gitlab_payloads() {
        let tree: Vec<TreeEntry> = serde_json::from_str(
            r#"[{"id":"a1","name":"main.go","type":"blob","path":"cmd/main.go","mode":"100644"},
                {"id":"b2","name":"cmd","type":"tree","path":"cmd","mode":"040000"}]"#,
        )
        .unwrap();
        assert!(tree[0].is_file());
        assert!(!tree[1].is_file());

        let blame: Vec<BlameRange> = serde_json::from_str(
            r#"[{"commit":{"id":"c0ffee","committer_email":"alice@x.com","committer_name":"Alice"},
                 "lines":["package main", "", "func main() {}"]}]"#,
        )
        .unwrap();
        assert_eq!(blame[0].committer_email(), "alice@x.com");
        assert_eq!(blame[0].counted_lines(), 2);

        let repos: Vec<Repository> = serde_json::from_str(
            r#"[{"id":7,"path_with_namespace":"group/app","default_branch":"main"},
                {"id":8,"path_with_namespace":"group/empty","default_branch":null}]"#,
        )
        .unwrap();
        assert_eq!(repos[0].path, "group/app");
        assert_eq!(repos[1].default_branch, None);
    }
}
