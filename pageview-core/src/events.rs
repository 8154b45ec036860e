use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::geometry::Size;

/// Upward notifications. Queued and drained by the host on its next tick, never
/// delivered from inside a layout pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    DocumentChanged,
    PageChanged(u32),
    /// First successful layout plus initial navigation.
    ViewReady,
    SelectionChanged,
    ViewSizeChanged { new: Size, old: Size },
    /// Something visible changed and the view should redraw.
    Invalidated,
}

#[derive(Debug, Default)]
pub struct EventQueue {
    pending: Mutex<VecDeque<ViewerEvent>>,
    notify: Notify,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back-to-back invalidations collapse into one.
    pub fn push(&self, event: ViewerEvent) {
        {
            let mut pending = self.pending.lock();
            if event == ViewerEvent::Invalidated
                && pending.back() == Some(&ViewerEvent::Invalidated)
            {
                return;
            }
            pending.push_back(event);
        }
        self.notify.notify_one();
    }

    pub fn drain(&self) -> Vec<ViewerEvent> {
        self.pending.lock().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Resolves once an event has been pushed since the last wait.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}
