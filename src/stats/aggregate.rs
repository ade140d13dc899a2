//! Repository -> file -> blame fan-out and attribution into the counter store.

use super::barrier::QuiescenceBarrier;
use super::counter::CounterStore;
use super::fetch::Pager;
use super::progress::ProgressReporter;
use crate::cancel::CancellationToken;
use crate::config::Settings;
use crate::error::{Result, StatError};
use crate::identity::IdentityResolver;
use crate::language::{extension_of, Language, LanguageRegistry};
use crate::model::{BlameRange, Repository, UserCounts};
use crate::remote::RemoteService;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Frozen result of one aggregation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregate {
    pub per_user: BTreeMap<String, UserCounts>,
    pub per_lang: BTreeMap<String, u64>,
    pub total: u64,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub repositories_discovered: u64,
    pub repositories_excluded: u64,
    pub repositories_processed: u64,
    pub repositories_skipped: u64,
    pub files_discovered: u64,
    pub files_blamed: u64,
    pub files_failed: u64,
}

#[derive(Debug, Default)]
struct RunCounters {
    repositories_discovered: AtomicU64,
    repositories_excluded: AtomicU64,
    repositories_processed: AtomicU64,
    repositories_skipped: AtomicU64,
    files_discovered: AtomicU64,
    files_blamed: AtomicU64,
    files_failed: AtomicU64,
}

impl RunCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn summary(&self) -> RunSummary {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        RunSummary {
            repositories_discovered: load(&self.repositories_discovered),
            repositories_excluded: load(&self.repositories_excluded),
            repositories_processed: load(&self.repositories_processed),
            repositories_skipped: load(&self.repositories_skipped),
            files_discovered: load(&self.files_discovered),
            files_blamed: load(&self.files_blamed),
            files_failed: load(&self.files_failed),
        }
    }
}

/// State shared by every task of a run.
struct Engine {
    service: Arc<dyn RemoteService>,
    resolver: IdentityResolver,
    languages: LanguageRegistry,
    counters: CounterStore,
    cancel: CancellationToken,
    progress: ProgressReporter,
    file_limit: Arc<Semaphore>,
    terminal: OnceLock<StatError>,
    run: RunCounters,
}

/// Runs one full aggregation: resolve identities, then fan out over
/// repositories and files until every discovered task has finished.
pub async fn run(
    service: Arc<dyn RemoteService>,
    settings: &Settings,
    cancel: CancellationToken,
    progress: ProgressReporter,
) -> Result<Aggregate> {
    let users = {
        let svc = Arc::clone(&service);
        let token = cancel.clone();
        Pager::new(&cancel, "listing users", "server", move |page| {
            let svc = Arc::clone(&svc);
            let token = token.clone();
            async move { svc.list_users(page, &token).await }
        })
        .collect()
        .await?
    };
    debug!("resolved {} remote users", users.len());

    let resolver = IdentityResolver::build(&settings.aliases, &users);
    debug!(aliases = ?resolver.aliases_by_key(), "identities resolved");
    let counters = CounterStore::for_run(&resolver, &settings.languages);

    let engine = Arc::new(Engine {
        service,
        resolver,
        languages: settings.languages.clone(),
        counters,
        cancel,
        progress,
        file_limit: Arc::new(Semaphore::new(settings.concurrency.files.max(1))),
        terminal: OnceLock::new(),
        run: RunCounters::default(),
    });

    engine
        .fan_out(
            settings.query.as_deref(),
            settings.exclude.as_ref(),
            settings.concurrency.repositories,
        )
        .await;

    match engine.terminal.get() {
        Some(err) => Err(err.clone()),
        None => Ok(engine.snapshot()),
    }
}

async fn acquire(limit: &Arc<Semaphore>, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit> {
    tokio::select! {
        permit = Arc::clone(limit).acquire_owned() => permit.map_err(|_| StatError::Cancelled),
        _ = cancel.cancelled() => Err(StatError::Cancelled),
    }
}

impl Engine {
    /// First terminal error wins; later ones are dropped.
    fn fail(&self, err: StatError) {
        if self.terminal.set(err).is_err() {
            debug!("terminal error already recorded");
        }
    }

    async fn fan_out(self: &Arc<Self>, query: Option<&str>, exclude: Option<&Regex>, repo_limit: usize) {
        let barrier = Arc::new(QuiescenceBarrier::new());
        let repo_limit = Arc::new(Semaphore::new(repo_limit.max(1)));

        if let Err(err) = self.discover_repositories(query, exclude, &barrier, &repo_limit).await {
            self.fail(err);
        }

        barrier.close();
        barrier.wait().await;

        if self.cancel.is_cancelled() {
            self.fail(StatError::Cancelled);
        }

        let summary = self.run.summary();
        info!(
            discovered = summary.repositories_discovered,
            excluded = summary.repositories_excluded,
            processed = summary.repositories_processed,
            skipped = summary.repositories_skipped,
            files = summary.files_discovered,
            blamed = summary.files_blamed,
            failed = summary.files_failed,
            "aggregation finished"
        );
    }

    async fn discover_repositories(
        self: &Arc<Self>,
        query: Option<&str>,
        exclude: Option<&Regex>,
        barrier: &Arc<QuiescenceBarrier>,
        repo_limit: &Arc<Semaphore>,
    ) -> Result<()> {
        let svc = Arc::clone(&self.service);
        let token = self.cancel.clone();
        let owned_query = query.map(str::to_string);
        let mut pager = Pager::new(&self.cancel, "listing projects", query.unwrap_or("*"), move |page| {
            let svc = Arc::clone(&svc);
            let token = token.clone();
            let query = owned_query.clone();
            async move { svc.list_repositories(query.as_deref(), page, &token).await }
        });

        while let Some(repositories) = pager.next_page().await? {
            for repo in repositories {
                if let Some(pattern) = exclude.filter(|re| re.is_match(&repo.path)) {
                    debug!("repository {} matches exclude pattern {}, skipping", repo.path, pattern);
                    RunCounters::bump(&self.run.repositories_excluded);
                    continue;
                }

                self.cancel.check()?;
                let permit = acquire(repo_limit, &self.cancel).await?;
                let guard = barrier.register();
                RunCounters::bump(&self.run.repositories_discovered);
                self.progress.discovered(1);

                let engine = Arc::clone(self);
                tokio::spawn(async move {
                    let _guard = guard;
                    let _permit = permit;
                    let repo = Arc::new(repo);
                    let result = engine.process_repository(Arc::clone(&repo)).await;
                    engine.finish_repository(&repo, result);
                });
            }
        }

        Ok(())
    }

    fn finish_repository(&self, repo: &Repository, result: Result<()>) {
        match result {
            Ok(()) => {
                RunCounters::bump(&self.run.repositories_processed);
                self.progress.completed();
            }
            Err(err) if err.is_cancelled() => self.fail(StatError::Cancelled),
            Err(err) => {
                warn!("skipping repository {}: {err}", repo.path);
                self.run.repositories_discovered.fetch_sub(1, Ordering::Relaxed);
                RunCounters::bump(&self.run.repositories_skipped);
                self.progress.retracted();
            }
        }
    }

    /// Completes only after the tree listing is exhausted and every blame
    /// task it spawned has finished, including when the listing fails.
    /// Lines are collected per repository and only reach the run's counters
    /// when the whole repository succeeded.
    async fn process_repository(self: &Arc<Self>, repo: Arc<Repository>) -> Result<()> {
        self.cancel.check()?;

        let barrier = Arc::new(QuiescenceBarrier::new());
        let delta = Arc::new(self.counters.empty_like());
        let listed = self.discover_files(&repo, &barrier, &delta).await;
        barrier.close();
        barrier.wait().await;

        listed?;
        self.cancel.check()?;
        self.counters.absorb(&delta);
        Ok(())
    }

    async fn discover_files(
        self: &Arc<Self>,
        repo: &Arc<Repository>,
        barrier: &Arc<QuiescenceBarrier>,
        delta: &Arc<CounterStore>,
    ) -> Result<()> {
        let reference: Arc<str> = Arc::from(repo.default_branch.as_deref().unwrap_or("HEAD"));
        let svc = Arc::clone(&self.service);
        let token = self.cancel.clone();
        let repo_id = repo.id;
        let mut pager = Pager::new(&self.cancel, "listing repo tree", repo.path.clone(), move |page| {
            let svc = Arc::clone(&svc);
            let token = token.clone();
            async move { svc.list_tree(repo_id, true, page, &token).await }
        });

        while let Some(entries) = pager.next_page().await? {
            self.cancel.check()?;

            for entry in entries {
                if !entry.is_file() {
                    continue;
                }
                let Some(language) = self.languages.for_path(&entry.path) else {
                    debug!("skipping file with extension {:?}", extension_of(&entry.path).unwrap_or(""));
                    continue;
                };
                let language = Arc::clone(language);

                self.cancel.check()?;
                let permit = acquire(&self.file_limit, &self.cancel).await?;
                let guard = barrier.register();
                RunCounters::bump(&self.run.files_discovered);

                let engine = Arc::clone(self);
                let repo = Arc::clone(repo);
                let reference = Arc::clone(&reference);
                let delta = Arc::clone(delta);
                tokio::spawn(async move {
                    let _guard = guard;
                    let _permit = permit;
                    engine.blame_file(&repo, &entry.path, &reference, &language, &delta).await;
                });
            }
        }

        Ok(())
    }

    async fn blame_file(
        &self,
        repo: &Repository,
        path: &str,
        reference: &str,
        language: &Language,
        counters: &CounterStore,
    ) {
        if self.cancel.is_cancelled() {
            return;
        }

        let ranges = match self.service.file_blame(repo.id, path, reference, &self.cancel).await {
            Ok(ranges) => ranges,
            Err(err) if err.is_cancelled() => return,
            Err(err) => {
                warn!("error getting blame for file {path} in repository {}: {err}", repo.path);
                RunCounters::bump(&self.run.files_failed);
                return;
            }
        };

        if self.cancel.is_cancelled() {
            return;
        }

        self.attribute(&ranges, language, counters);
        RunCounters::bump(&self.run.files_blamed);
    }

    fn attribute(&self, ranges: &[BlameRange], language: &Language, counters: &CounterStore) {
        for range in ranges {
            let identity = self.resolver.resolve(range.committer_email());
            counters.increment(identity.id, language.id, range.counted_lines());
        }
    }

    fn snapshot(&self) -> Aggregate {
        let per_user = self
            .resolver
            .identities()
            .iter()
            .filter_map(|identity| {
                let counts = self.counters.identity_snapshot(identity.id, &self.languages);
                (counts.total > 0).then(|| (identity.key().to_string(), counts))
            })
            .collect();

        Aggregate {
            per_user,
            per_lang: self.counters.per_language(&self.languages),
            total: self.counters.total(),
            summary: self.run.summary(),
        }
    }
}
