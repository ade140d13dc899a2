use crate::cancel::CancellationToken;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// More work was discovered; the upper bound grows.
    Discovered(u64),
    /// One unit of discovered work finished.
    Completed,
    /// A unit of discovered work was abandoned; the upper bound shrinks.
    Retracted,
}

/// Best-effort sender of progress events.
///
/// Sending never blocks. A disabled reporter, a closed consumer, or a
/// cancelled run all drop the event silently.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
    cancel: CancellationToken,
}

impl ProgressReporter {
    pub fn disabled() -> Self {
        Self {
            tx: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Reporter plus the raw event stream, for custom consumers.
    pub fn channel(cancel: CancellationToken) -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx), cancel }, rx)
    }

    /// Reporter drawing an indicatif bar on stderr, when stderr is a terminal.
    pub fn bar(enabled: bool, cancel: CancellationToken) -> (Self, Option<JoinHandle<()>>) {
        if !enabled || !std::io::stderr().is_terminal() {
            return (Self::disabled(), None);
        }
        let (reporter, rx) = Self::channel(cancel.clone());
        let handle = tokio::spawn(drive_bar(rx, cancel));
        (reporter, Some(handle))
    }

    fn send(&self, event: ProgressEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn discovered(&self, n: u64) {
        self.send(ProgressEvent::Discovered(n));
    }

    pub fn completed(&self) {
        self.send(ProgressEvent::Completed);
    }

    pub fn retracted(&self) {
        self.send(ProgressEvent::Retracted);
    }
}

async fn drive_bar(mut rx: mpsc::UnboundedReceiver<ProgressEvent>, cancel: CancellationToken) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} repositories")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(ProgressEvent::Discovered(n)) => bar.inc_length(n),
                Some(ProgressEvent::Completed) => bar.inc(1),
                Some(ProgressEvent::Retracted) => {
                    let len = bar.length().unwrap_or(0);
                    bar.set_length(len.saturating_sub(1));
                }
                None => break,
            },
            _ = cancel.cancelled() => break,
        }
    }

    bar.finish_and_clear();
}
