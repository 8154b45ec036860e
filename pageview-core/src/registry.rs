use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::document::{DocumentProvider, DocumentService, DocumentSource};

struct Entry {
    refs: usize,
    service: Arc<OnceCell<Arc<dyn DocumentService>>>,
}

/// Reference-counted documents shared between viewers, keyed by source equality.
/// Owned by the application root.
#[derive(Default)]
pub struct DocumentRegistry {
    entries: Mutex<HashMap<DocumentSource, Entry>>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `source` once; concurrent and later attaches share the same service.
    pub async fn attach(
        &self,
        source: &DocumentSource,
        provider: &dyn DocumentProvider,
    ) -> Result<Arc<dyn DocumentService>> {
        let cell = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(source.clone()).or_insert_with(|| Entry {
                refs: 0,
                service: Arc::new(OnceCell::new()),
            });
            entry.refs += 1;
            Arc::clone(&entry.service)
        };

        let opened = cell.get_or_try_init(|| provider.open(source)).await;
        match opened {
            Ok(service) => {
                debug!(document = %source.display_name(), "document attached");
                Ok(Arc::clone(service))
            }
            Err(err) => {
                self.detach(source);
                Err(err)
            }
        }
    }

    /// Drops one reference. Returns true when the shared document was released.
    pub fn detach(&self, source: &DocumentSource) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(source) else {
            return false;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 {
            return false;
        }
        entries.remove(source);
        debug!(document = %source.display_name(), "document released");
        true
    }

    pub fn ref_count(&self, source: &DocumentSource) -> usize {
        self.entries.lock().get(source).map_or(0, |entry| entry.refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProvider;

    #[tokio::test]
    async fn concurrent_attaches_share_one_document() {
        let registry = DocumentRegistry::new();
        let provider = FakeProvider { pages: 2 };
        let source = DocumentSource::file("/tmp/shared.pdf");

        let (a, b) = tokio::join!(
            registry.attach(&source, &provider),
            registry.attach(&source, &provider)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.ref_count(&source), 2);

        assert!(!registry.detach(&source));
        assert!(registry.detach(&source));
        assert_eq!(registry.ref_count(&source), 0);

        let reopened = registry.attach(&source, &provider).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &reopened));
    }

    #[tokio::test]
    async fn failed_open_does_not_leak_a_reference() {
        let registry = DocumentRegistry::new();
        let provider = FakeProvider { pages: 1 };
        let source = DocumentSource::file("/tmp/broken.pdf");
        assert!(registry.attach(&source, &provider).await.is_err());
        assert_eq!(registry.ref_count(&source), 0);
    }
}
