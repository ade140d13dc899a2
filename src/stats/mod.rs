pub mod aggregate;
pub mod barrier;
pub mod counter;
pub mod exec;
pub mod fetch;
pub mod output;
pub mod progress;

pub use aggregate::{Aggregate, RunSummary};
pub use barrier::{QuiescenceBarrier, WorkGuard};
pub use counter::CounterStore;
pub use exec::exec;
pub use fetch::Pager;
pub use progress::{ProgressEvent, ProgressReporter};

use crate::cancel::CancellationToken;
use crate::config::Settings;
use crate::error::StatError;
use crate::model::UserCounts;
use crate::remote::RemoteService;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

#[derive(Debug)]
struct Outcome {
    aggregate: Aggregate,
    error: Option<StatError>,
}

/// Line statistics for one remote service.
///
/// The first call to [`Stats::per_user`], [`Stats::per_language`] or
/// [`Stats::total`] runs the aggregation; every later call, concurrent or not,
/// reads the cached result without touching the remote again. A failed run
/// yields empty results and its error through [`Stats::err`].
pub struct Stats {
    service: Arc<dyn RemoteService>,
    settings: Settings,
    cancel: CancellationToken,
    progress: ProgressReporter,
    outcome: OnceCell<Outcome>,
}

impl Stats {
    pub fn new(service: Arc<dyn RemoteService>, settings: Settings, cancel: CancellationToken) -> Self {
        Self {
            service,
            settings,
            cancel,
            progress: ProgressReporter::disabled(),
            outcome: OnceCell::new(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    async fn outcome(&self) -> &Outcome {
        self.outcome
            .get_or_init(|| async {
                let result = aggregate::run(
                    Arc::clone(&self.service),
                    &self.settings,
                    self.cancel.clone(),
                    self.progress.clone(),
                )
                .await;
                match result {
                    Ok(aggregate) => Outcome { aggregate, error: None },
                    Err(error) => Outcome {
                        aggregate: Aggregate::default(),
                        error: Some(error),
                    },
                }
            })
            .await
    }

    /// Identities with a non-zero total, keyed by canonical key.
    pub async fn per_user(&self) -> &BTreeMap<String, UserCounts> {
        &self.outcome().await.aggregate.per_user
    }

    pub async fn per_language(&self) -> &BTreeMap<String, u64> {
        &self.outcome().await.aggregate.per_lang
    }

    pub async fn total(&self) -> u64 {
        self.outcome().await.aggregate.total
    }

    pub async fn summary(&self) -> RunSummary {
        self.outcome().await.aggregate.summary
    }

    /// The run's terminal error, once the run has happened.
    pub fn err(&self) -> Option<&StatError> {
        self.outcome.get().and_then(|outcome| outcome.error.as_ref())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}
