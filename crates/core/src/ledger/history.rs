//! Lazy, restartable account history.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use super::error::LedgerError;
use super::store::{LedgerResult, LedgerStore};
use super::types::{AccountKey, HistoryRange, Transaction};

/// An account's transactions in version order, fetched page by page.
///
/// Every call to [`History::stream`] starts over from the first page, so a
/// `History` can be consumed any number of times.
#[derive(Debug, Clone)]
pub struct History {
    store: Arc<dyn LedgerStore>,
    key: AccountKey,
    range: HistoryRange,
    page_size: u64,
}

impl History {
    pub(crate) fn new(
        store: Arc<dyn LedgerStore>,
        key: AccountKey,
        range: HistoryRange,
        page_size: u64,
    ) -> Self {
        Self {
            store,
            key,
            range,
            page_size: page_size.max(1),
        }
    }

    /// The account this history belongs to.
    #[must_use]
    pub fn account(&self) -> AccountKey {
        self.key
    }

    /// Streams the transactions, fetching one page at a time.
    pub fn stream(&self) -> BoxStream<'static, LedgerResult<Transaction>> {
        let store = Arc::clone(&self.store);
        let (key, range, page_size) = (self.key, self.range, self.page_size);
        let full_page = usize::try_from(page_size).unwrap_or(usize::MAX);

        stream::try_unfold(Some(0_i64), move |cursor| {
            let store = Arc::clone(&store);
            async move {
                let Some(after) = cursor else {
                    return Ok(None);
                };
                let page = store.history_page(key, range, after, page_size).await?;
                if page.is_empty() {
                    return Ok(None);
                }
                let next = if page.len() < full_page {
                    None
                } else {
                    page.last().map(|tx| tx.account_version)
                };
                Ok::<_, LedgerError>(Some((stream::iter(page.into_iter().map(Ok)), next)))
            }
        })
        .try_flatten()
        .boxed()
    }

    /// Collects the whole history.
    pub async fn collect_all(&self) -> LedgerResult<Vec<Transaction>> {
        self.stream().try_collect().await
    }
}
