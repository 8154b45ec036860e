use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

struct Entries<T> {
    /// Document epoch the cells belong to.
    epoch: u64,
    cells: HashMap<u32, Arc<OnceCell<Arc<T>>>>,
}

/// Per-page memoized loads. Concurrent loads of one page attach to the same in-flight
/// future; a failed load leaves the page empty so the next caller retries.
///
/// Cells are tagged with the document epoch. A load issued for an older epoch never
/// creates or fills a cell of the current one.
pub struct LazyPageCache<T> {
    entries: Mutex<Entries<T>>,
}

impl<T> Default for LazyPageCache<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Entries {
                epoch: 0,
                cells: HashMap::new(),
            }),
        }
    }
}

impl<T> LazyPageCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.entries.lock().epoch
    }

    pub fn cached(&self, page_number: u32) -> Option<Arc<T>> {
        self.entries
            .lock()
            .cells
            .get(&page_number)
            .and_then(|cell| cell.get().cloned())
    }

    /// Loads `page_number` for the document of `epoch`. Returns `Ok(None)` without
    /// running `loader` when the cache has already moved to another epoch.
    pub async fn load<F, Fut>(&self, epoch: u64, page_number: u32, loader: F) -> Result<Option<Arc<T>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let cell = {
            let mut entries = self.entries.lock();
            if entries.epoch != epoch {
                return Ok(None);
            }
            Arc::clone(entries.cells.entry(page_number).or_default())
        };
        let loaded = cell
            .get_or_try_init(|| async move { loader().await.map(Arc::new) })
            .await?;
        Ok(Some(Arc::clone(loaded)))
    }

    /// Forgets every page and starts serving `epoch`. Loads still in flight complete
    /// into detached cells.
    pub fn reset(&self, epoch: u64) {
        let mut entries = self.entries.lock();
        entries.cells.clear();
        entries.epoch = epoch;
    }

    pub fn loaded_pages(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self
            .entries
            .lock()
            .cells
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(page, _)| *page)
            .collect();
        pages.sort_unstable();
        pages
    }
}
