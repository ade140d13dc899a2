#![allow(dead_code)]

use async_trait::async_trait;
use gitstat::config::{Concurrency, Settings};
use gitstat::language::LanguageRegistry;
use gitstat::model::{BlameRange, EntryKind, Page, RemoteUser, Repository, TreeEntry};
use gitstat::remote::RemoteService;
use gitstat::{CancellationToken, Result, StatError};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn blame(email: &str, lines: &[&str]) -> BlameRange {
    BlameRange::new(email, lines.iter().map(|l| l.to_string()).collect())
}

pub fn user(id: u64, username: &str, email: &str) -> RemoteUser {
    RemoteUser {
        id,
        username: username.to_string(),
        email: Some(email.to_string()),
        public_email: None,
    }
}

pub fn settings(languages: &[(&str, &[&str])]) -> Settings {
    Settings {
        languages: LanguageRegistry::new(
            languages
                .iter()
                .map(|(name, exts)| (name.to_string(), exts.iter().map(|e| e.to_string()).collect())),
        ),
        concurrency: Concurrency {
            repositories: 4,
            files: 8,
        },
        ..Settings::default()
    }
}

pub fn aliases(pairs: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
        .collect()
}

/// In-memory hosting service with call accounting.
pub struct FakeService {
    page_size: usize,
    users: Vec<RemoteUser>,
    repos: Vec<Repository>,
    trees: HashMap<u64, Vec<TreeEntry>>,
    blames: HashMap<(u64, String), Vec<BlameRange>>,
    broken_trees: HashSet<u64>,
    broken_tree_pages: HashMap<u64, u32>,
    blame_delay: Duration,
    cancel_on_tree: Option<CancellationToken>,
    cancel_on_blame: Option<CancellationToken>,
    pub calls: AtomicUsize,
    pub blamed: Mutex<Vec<(u64, String)>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Default for FakeService {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeService {
    pub fn new() -> Self {
        Self {
            page_size: 2,
            users: Vec::new(),
            repos: Vec::new(),
            trees: HashMap::new(),
            blames: HashMap::new(),
            broken_trees: HashSet::new(),
            broken_tree_pages: HashMap::new(),
            blame_delay: Duration::ZERO,
            cancel_on_tree: None,
            cancel_on_blame: None,
            calls: AtomicUsize::new(0),
            blamed: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn page_size(mut self, n: usize) -> Self {
        self.page_size = n.max(1);
        self
    }

    pub fn user(mut self, user: RemoteUser) -> Self {
        self.users.push(user);
        self
    }

    /// Adds a repository whose tree holds `files`; files with `Some` blame answer it,
    /// files with `None` fail their blame request.
    pub fn repo(mut self, id: u64, path: &str, files: Vec<(&str, Option<Vec<BlameRange>>)>) -> Self {
        self.repos.push(Repository {
            id,
            path: path.to_string(),
            default_branch: Some("main".to_string()),
        });
        let mut tree = vec![TreeEntry {
            path: "src".to_string(),
            kind: EntryKind::Tree,
        }];
        for (file, ranges) in files {
            tree.push(TreeEntry {
                path: file.to_string(),
                kind: EntryKind::Blob,
            });
            if let Some(ranges) = ranges {
                self.blames.insert((id, file.to_string()), ranges);
            }
        }
        self.trees.insert(id, tree);
        self
    }

    /// Repository whose tree does not exist (404).
    pub fn empty_repo(mut self, id: u64, path: &str) -> Self {
        self.repos.push(Repository {
            id,
            path: path.to_string(),
            default_branch: None,
        });
        self
    }

    pub fn broken_tree(mut self, id: u64) -> Self {
        self.broken_trees.insert(id);
        self
    }

    /// Tree listing of `id` fails from page `page` on; earlier pages succeed.
    pub fn broken_tree_from_page(mut self, id: u64, page: u32) -> Self {
        self.broken_tree_pages.insert(id, page);
        self
    }

    pub fn blame_delay(mut self, delay: Duration) -> Self {
        self.blame_delay = delay;
        self
    }

    pub fn cancel_on_tree(mut self, token: CancellationToken) -> Self {
        self.cancel_on_tree = Some(token);
        self
    }

    pub fn cancel_on_blame(mut self, token: CancellationToken) -> Self {
        self.cancel_on_blame = Some(token);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn blamed_paths(&self) -> Vec<(u64, String)> {
        let mut blamed = self.blamed.lock().unwrap().clone();
        blamed.sort();
        blamed
    }

    fn page<T: Clone>(&self, items: &[T], page: u32) -> Page<T> {
        let start = (page as usize - 1) * self.page_size;
        let end = (start + self.page_size).min(items.len());
        let chunk = items.get(start..end).unwrap_or_default().to_vec();
        if end < items.len() {
            Page::with_next(chunk, page + 1)
        } else {
            Page::last(chunk)
        }
    }
}

#[async_trait]
impl RemoteService for FakeService {
    async fn list_users(&self, page: u32, cancel: &CancellationToken) -> Result<Page<RemoteUser>> {
        cancel.check()?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.page(&self.users, page))
    }

    async fn list_repositories(
        &self,
        query: Option<&str>,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Page<Repository>> {
        cancel.check()?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        let matching: Vec<Repository> = self
            .repos
            .iter()
            .filter(|r| query.map_or(true, |q| r.path.contains(q)))
            .cloned()
            .collect();
        Ok(self.page(&matching, page))
    }

    async fn list_tree(
        &self,
        repo_id: u64,
        _recursive: bool,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Page<TreeEntry>> {
        cancel.check()?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_tree {
            token.cancel();
            return Err(StatError::Cancelled);
        }
        let page_broken = self.broken_tree_pages.get(&repo_id).is_some_and(|from| page >= *from);
        if self.broken_trees.contains(&repo_id) || page_broken {
            return Err(StatError::Remote {
                status: 500,
                url: format!("/projects/{repo_id}/repository/tree"),
                message: "internal error".to_string(),
            });
        }
        match self.trees.get(&repo_id) {
            Some(tree) => Ok(self.page(tree, page)),
            None => Err(StatError::NotFound(format!("/projects/{repo_id}/repository/tree"))),
        }
    }

    async fn file_blame(
        &self,
        repo_id: u64,
        path: &str,
        _reference: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<BlameRange>> {
        cancel.check()?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.blamed.lock().unwrap().push((repo_id, path.to_string()));

        if let Some(token) = &self.cancel_on_blame {
            token.cancel();
            return Err(StatError::Cancelled);
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.blame_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.blame_delay) => {}
                _ = cancel.cancelled() => {
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    return Err(StatError::Cancelled);
                }
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.blames
            .get(&(repo_id, path.to_string()))
            .cloned()
            .ok_or_else(|| StatError::Remote {
                status: 500,
                url: format!("/projects/{repo_id}/repository/files/{path}/blame"),
                message: "blame failed".to_string(),
            })
    }
}
