use crate::cancel::CancellationToken;
use crate::error::{Result, StatError};
use crate::model::Page;
use std::future::Future;
use tracing::debug;

pub const FIRST_PAGE: u32 = 1;

/// Page-cursor iteration over a remote listing.
///
/// Checks cancellation before every request. A not-found answer ends the
/// listing as empty; any other failure is wrapped with the operation and target.
pub struct Pager<'a, T, F> {
    fetch: F,
    next: Option<u32>,
    cancel: &'a CancellationToken,
    operation: &'static str,
    target: String,
    _item: std::marker::PhantomData<fn() -> T>,
}

impl<'a, T, F, Fut> Pager<'a, T, F>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    pub fn new(
        cancel: &'a CancellationToken,
        operation: &'static str,
        target: impl Into<String>,
        fetch: F,
    ) -> Self {
        Self {
            fetch,
            next: Some(FIRST_PAGE),
            cancel,
            operation,
            target: target.into(),
            _item: std::marker::PhantomData,
        }
    }

    /// Next page of items, or `None` once the listing is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<T>>> {
        let Some(page) = self.next else {
            return Ok(None);
        };
        self.cancel.check()?;

        match (self.fetch)(page).await {
            Ok(Page { items, next }) => {
                // A cursor that does not move forward would loop forever.
                self.next = next.filter(|n| *n > page);
                Ok(Some(items))
            }
            Err(err) if err.is_not_found() => {
                debug!("{} for {}: not found, treating as empty", self.operation, self.target);
                self.next = None;
                Ok(None)
            }
            Err(StatError::Cancelled) => {
                self.next = None;
                Err(StatError::Cancelled)
            }
            Err(err) => {
                self.next = None;
                Err(StatError::listing(self.operation, self.target.clone(), err))
            }
        }
    }

    /// Drains the listing into a vector.
    pub async fn collect(mut self) -> Result<Vec<T>> {
        let mut all = Vec::new();
        while let Some(mut items) = self.next_page().await? {
            all.append(&mut items);
        }
        Ok(all)
    }
}
