use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

/// Bounded in-memory store of detection-triggering annotated frames
///
/// Replaces the temp-file handoff a filesystem-based deployment would use:
/// events carry the snapshot id and consumers fetch the bytes over the API.
/// Oldest snapshots are evicted once the bound is reached.
pub struct SnapshotStore {
    inner: Mutex<VecDeque<(String, Arc<Vec<u8>>)>>,
    max_entries: usize,
}

impl SnapshotStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Store a JPEG and return its id
    pub fn insert(&self, jpeg: Vec<u8>) -> String {
        let id = Uuid::new_v4().to_string();
        let mut entries = self.inner.lock();
        entries.push_back((id.clone(), Arc::new(jpeg)));
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
        id
    }

    pub fn get(&self, id: &str) -> Option<Arc<Vec<u8>>> {
        self.inner
            .lock()
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, data)| Arc::clone(data))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
