//! Queued index maintenance.
//!
//! Page saves and deletes call [`IndexQueue::enqueue`], which never blocks on
//! indexing. A pass drains the queue, applies every operation to a private
//! copy of the index and swaps the copy in, so searches always see a complete
//! snapshot. Passes run on [`IndexQueue::flush`] or on a background worker.
//!
//! An operation that fails stays queued ahead of newer ones, and so does
//! every later operation on the same page. A failed save is retried by the
//! next pass even when nothing new arrives.

use super::InvertedIndex;
use crate::error::{Result, SearchError};
use crate::search::analyzer::Analyzer;
use crate::store::{DocumentKey, PageStore};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// What happened to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Add,
    Update,
    Delete,
}

/// One queued change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOp {
    pub kind: OpKind,
    pub page_name: String,
    /// Attachment file name; `None` for the page itself.
    pub attachment: Option<String>,
}

impl PendingOp {
    pub fn new(kind: OpKind, page_name: impl Into<String>, attachment: Option<String>) -> Self {
        Self {
            kind,
            page_name: page_name.into(),
            attachment,
        }
    }

    pub fn add(page_name: impl Into<String>) -> Self {
        Self::new(OpKind::Add, page_name, None)
    }

    pub fn update(page_name: impl Into<String>) -> Self {
        Self::new(OpKind::Update, page_name, None)
    }

    pub fn delete(page_name: impl Into<String>) -> Self {
        Self::new(OpKind::Delete, page_name, None)
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(self.page_name.clone(), self.attachment.clone())
    }
}

/// The current index snapshot, replaced wholesale by each pass.
#[derive(Debug)]
pub struct SharedIndex {
    current: RwLock<Arc<InvertedIndex>>,
}

impl SharedIndex {
    pub fn new(index: InvertedIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
        }
    }

    /// The index as of the last completed pass.
    pub fn snapshot(&self) -> Arc<InvertedIndex> {
        Arc::clone(&self.current.read())
    }

    fn replace(&self, index: InvertedIndex) {
        *self.current.write() = Arc::new(index);
    }
}

#[derive(Default)]
struct PassState {
    /// Operations to apply before anything newer from the channel.
    retry: VecDeque<PendingOp>,
    /// The snapshot has changes the index directory does not.
    unsaved: bool,
}

struct QueueInner {
    sender: Sender<PendingOp>,
    receiver: Receiver<PendingOp>,
    store: Arc<dyn PageStore>,
    index: SharedIndex,
    index_dir: Option<PathBuf>,
    sent: AtomicU64,
    applied: AtomicU64,
    /// Held for the whole of a pass; passes never overlap.
    pass: Mutex<PassState>,
    applied_cv: (Mutex<()>, Condvar),
}

/// Handle to the maintenance queue. Clones share the same queue.
#[derive(Clone)]
pub struct IndexQueue {
    inner: Arc<QueueInner>,
}

impl IndexQueue {
    /// Queue maintaining `index` from `store`, kept in memory only.
    pub fn new(store: Arc<dyn PageStore>, index: InvertedIndex) -> Self {
        Self::build(store, index, None)
    }

    /// Queue that saves the index to `index_dir` after every pass.
    pub fn persistent(store: Arc<dyn PageStore>, index: InvertedIndex, index_dir: PathBuf) -> Self {
        Self::build(store, index, Some(index_dir))
    }

    fn build(store: Arc<dyn PageStore>, index: InvertedIndex, index_dir: Option<PathBuf>) -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            inner: Arc::new(QueueInner {
                sender,
                receiver,
                store,
                index: SharedIndex::new(index),
                index_dir,
                sent: AtomicU64::new(0),
                applied: AtomicU64::new(0),
                pass: Mutex::new(PassState::default()),
                applied_cv: (Mutex::new(()), Condvar::new()),
            }),
        }
    }

    /// Record a change. Returns immediately.
    pub fn enqueue(&self, op: PendingOp) -> Result<()> {
        tracing::trace!("Queued {:?} for {}", op.kind, op.key());
        self.inner.sent.fetch_add(1, Ordering::SeqCst);
        self.inner
            .sender
            .send(op)
            .map_err(|e| SearchError::IndexError(format!("Index queue closed: {}", e)))
    }

    /// Operations not yet applied, including those kept for retry.
    pub fn pending(&self) -> usize {
        let retry = self.inner.pass.try_lock().map_or(0, |state| state.retry.len());
        self.inner.receiver.len() + retry
    }

    /// Total operations applied so far.
    pub fn applied(&self) -> u64 {
        self.inner.applied.load(Ordering::SeqCst)
    }

    /// The index as of the last completed pass.
    pub fn snapshot(&self) -> Arc<InvertedIndex> {
        self.inner.index.snapshot()
    }

    /// Apply everything enqueued before this call.
    ///
    /// Returns the number of operations this call applied; operations taken
    /// by a concurrent pass are complete by the time it returns. When some
    /// operation or the save fails, the error is returned after everything
    /// else was applied, and calling `flush` again retries.
    pub fn flush(&self) -> Result<usize> {
        self.run_pass()
    }

    /// Block until every operation enqueued so far has been applied by some
    /// pass, or `timeout` elapses. Returns whether the queue caught up.
    pub fn wait_until_applied(&self, timeout: Duration) -> bool {
        let target = self.inner.sent.load(Ordering::SeqCst);
        let deadline = Instant::now() + timeout;
        let (lock, cv) = &self.inner.applied_cv;
        let mut guard = lock.lock();
        loop {
            if self.applied() >= target {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let _ = cv.wait_for(&mut guard, deadline - now);
        }
    }

    /// Run passes on a background thread every `interval`.
    pub fn spawn_worker(&self, interval: Duration) -> IndexWorker {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let queue = self.clone();
        let handle = thread::spawn(move || {
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(e) = queue.run_pass() {
                            tracing::error!("Index maintenance pass failed: {}", e);
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        if let Err(e) = queue.run_pass() {
                            tracing::error!("Final index maintenance pass failed: {}", e);
                        }
                        break;
                    }
                }
            }
            tracing::debug!("Index worker stopped");
        });

        IndexWorker {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    fn run_pass(&self) -> Result<usize> {
        let inner = &self.inner;
        let mut state = inner.pass.lock();

        let mut ops = std::mem::take(&mut state.retry);
        ops.extend(inner.receiver.try_iter());
        if ops.is_empty() && !state.unsaved {
            return Ok(0);
        }

        let start = Instant::now();
        let mut next = InvertedIndex::clone(&inner.index.snapshot());
        let analyzer = next.analyzer();
        let mut applied = 0usize;
        let mut blocked: HashSet<String> = HashSet::new();
        let mut first_error = None;

        for op in ops {
            if blocked.contains(&op.page_name) {
                state.retry.push_back(op);
                continue;
            }
            match apply(&mut next, inner.store.as_ref(), &analyzer, &op) {
                Ok(()) => applied += 1,
                Err(e) => {
                    tracing::warn!("Index update for {} failed, will retry: {}", op.key(), e);
                    blocked.insert(op.page_name.clone());
                    first_error.get_or_insert(e);
                    state.retry.push_back(op);
                }
            }
        }

        let saved = match &inner.index_dir {
            Some(dir) if applied > 0 || state.unsaved => next.save(dir),
            _ => Ok(()),
        };
        state.unsaved = saved.is_err();
        if applied > 0 || saved.is_ok() {
            inner.index.replace(next);
        }

        if applied > 0 {
            inner.applied.fetch_add(applied as u64, Ordering::SeqCst);
            let (lock, cv) = &inner.applied_cv;
            let _guard = lock.lock();
            cv.notify_all();
        }

        tracing::debug!("Applied {} index operations in {:?}", applied, start.elapsed());
        if let Some(e) = first_error {
            return Err(SearchError::FlushIncomplete {
                deferred: state.retry.len(),
                message: e.to_string(),
            });
        }
        saved.map(|()| applied)
    }
}

impl std::fmt::Debug for IndexQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexQueue")
            .field("pending", &self.pending())
            .field("applied", &self.applied())
            .field("index_dir", &self.inner.index_dir)
            .finish()
    }
}

fn apply(
    index: &mut InvertedIndex,
    store: &dyn PageStore,
    analyzer: &Analyzer,
    op: &PendingOp,
) -> Result<()> {
    let key = op.key();
    match op.kind {
        OpKind::Add | OpKind::Update => match store.load_document(&key)? {
            None => {
                index.remove(&key);
            }
            Some(doc) => {
                let current = index.get(&key).is_some_and(|indexed| !indexed.is_stale(doc.mtime));
                if !current {
                    index.insert(&doc, analyzer);
                }
            }
        },
        OpKind::Delete => {
            if op.attachment.is_none() {
                index.remove_page(&op.page_name);
            } else {
                index.remove(&key);
            }
        }
    }
    Ok(())
}

/// Background pass runner. Dropping it stops the thread after a last pass.
#[derive(Debug)]
pub struct IndexWorker {
    stop: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl IndexWorker {
    /// Stop the worker and wait for its final pass.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Index worker panicked");
            }
        }
    }
}

impl Drop for IndexWorker {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::types::FieldScope;
    use crate::store::{MemoryStore, PageDocument};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicU32;
    use tempfile::TempDir;

    /// Store whose next `failures` loads fail.
    #[derive(Default)]
    struct FlakyStore {
        pages: MemoryStore,
        failures: AtomicU32,
    }

    impl PageStore for FlakyStore {
        fn list_documents(&self) -> Result<Vec<DocumentKey>> {
            self.pages.list_documents()
        }

        fn load_document(&self, key: &DocumentKey) -> Result<Option<PageDocument>> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(SearchError::DocumentRead {
                    page: key.to_string(),
                    message: "disk hiccup".to_string(),
                });
            }
            self.pages.load_document(key)
        }
    }

    fn setup() -> (Arc<MemoryStore>, IndexQueue) {
        let store = Arc::new(MemoryStore::new());
        let queue = IndexQueue::new(store.clone(), InvertedIndex::new("en", false));
        (store, queue)
    }

    fn has_word(index: &InvertedIndex, word: &str) -> bool {
        index
            .postings(FieldScope::FullText)
            .is_some_and(|postings| postings.contains_key(word))
    }

    #[test]
    fn test_enqueue_is_deferred() {
        let (store, queue) = setup();
        store.put(PageDocument::page("A", "alpha"));
        queue.enqueue(PendingOp::add("A")).unwrap();

        assert_eq!(queue.pending(), 1);
        assert!(queue.snapshot().is_empty());

        assert_eq!(queue.flush().unwrap(), 1);
        assert_eq!(queue.pending(), 0);
        assert!(has_word(&queue.snapshot(), "alpha"));
    }

    #[test]
    fn test_update_keeps_doc_id() {
        let (store, queue) = setup();
        store.put(PageDocument::page("A", "alpha"));
        queue.enqueue(PendingOp::add("A")).unwrap();
        queue.flush().unwrap();
        let id = queue.snapshot().get(&DocumentKey::page("A")).unwrap().id;

        store.put(PageDocument::page("A", "beta"));
        queue.enqueue(PendingOp::update("A")).unwrap();
        queue.flush().unwrap();

        let index = queue.snapshot();
        assert_eq!(index.get(&DocumentKey::page("A")).unwrap().id, id);
        assert!(has_word(&index, "beta"));
        assert!(!has_word(&index, "alpha"));
    }

    #[test]
    fn test_unchanged_update_is_noop() {
        let (store, queue) = setup();
        let mtime = store.put(PageDocument::page("A", "alpha"));
        queue.enqueue(PendingOp::add("A")).unwrap();
        queue.enqueue(PendingOp::update("A")).unwrap();
        queue.flush().unwrap();

        let index = queue.snapshot();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&DocumentKey::page("A")).unwrap().mtime, mtime);
    }

    #[test]
    fn test_add_of_missing_page_removes_it() {
        let (store, queue) = setup();
        store.put(PageDocument::page("A", "alpha"));
        queue.enqueue(PendingOp::add("A")).unwrap();
        queue.flush().unwrap();

        store.remove(&DocumentKey::page("A"));
        queue.enqueue(PendingOp::update("A")).unwrap();
        queue.flush().unwrap();
        assert!(queue.snapshot().is_empty());
    }

    #[test]
    fn test_delete_page_removes_attachments() {
        let (store, queue) = setup();
        store.put(PageDocument::page("A", "alpha"));
        store.put(PageDocument::attachment("A", "a.txt", "attached"));
        store.put(PageDocument::page("B", "beta"));
        queue.enqueue(PendingOp::add("A")).unwrap();
        queue
            .enqueue(PendingOp::new(OpKind::Add, "A", Some("a.txt".to_string())))
            .unwrap();
        queue.enqueue(PendingOp::add("B")).unwrap();
        queue.flush().unwrap();
        assert_eq!(queue.snapshot().len(), 3);

        queue.enqueue(PendingOp::delete("A")).unwrap();
        // deleting twice is harmless
        queue.enqueue(PendingOp::delete("A")).unwrap();
        queue.flush().unwrap();

        let index = queue.snapshot();
        assert_eq!(index.len(), 1);
        assert!(index.get(&DocumentKey::page("B")).is_some());
    }

    #[test]
    fn test_snapshot_survives_pass() {
        let (store, queue) = setup();
        store.put(PageDocument::page("A", "alpha"));
        queue.enqueue(PendingOp::add("A")).unwrap();
        queue.flush().unwrap();

        let before = queue.snapshot();
        queue.enqueue(PendingOp::delete("A")).unwrap();
        queue.flush().unwrap();

        assert_eq!(before.len(), 1);
        assert!(queue.snapshot().is_empty());
    }

    #[test]
    fn test_flush_with_nothing_queued() {
        let (_store, queue) = setup();
        assert_eq!(queue.flush().unwrap(), 0);
    }

    #[test]
    fn test_persistent_queue_saves() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.put(PageDocument::page("A", "alpha"));
        let queue = IndexQueue::persistent(
            store.clone(),
            InvertedIndex::new("en", false),
            temp_dir.path().to_path_buf(),
        );
        queue.enqueue(PendingOp::add("A")).unwrap();
        queue.flush().unwrap();

        let loaded = InvertedIndex::load(temp_dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_worker_applies_in_background() {
        let (store, queue) = setup();
        let worker = queue.spawn_worker(Duration::from_millis(10));

        store.put(PageDocument::page("A", "alpha"));
        queue.enqueue(PendingOp::add("A")).unwrap();
        assert!(queue.wait_until_applied(Duration::from_secs(5)));
        assert_eq!(queue.snapshot().len(), 1);

        worker.shutdown();
    }

    #[test]
    fn test_worker_drains_on_shutdown() {
        let (store, queue) = setup();
        let worker = queue.spawn_worker(Duration::from_secs(60));

        store.put(PageDocument::page("A", "alpha"));
        queue.enqueue(PendingOp::add("A")).unwrap();
        worker.shutdown();

        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.snapshot().len(), 1);
    }

    #[test]
    fn test_concurrent_enqueue_and_flush() {
        let (store, queue) = setup();
        for i in 0..40 {
            store.put(PageDocument::page(format!("Page{}", i), format!("word{}", i)));
        }

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in (t * 10)..(t * 10 + 10) {
                        queue.enqueue(PendingOp::add(format!("Page{}", i))).unwrap();
                        if i % 3 == 0 {
                            queue.flush().unwrap();
                        }
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        queue.flush().unwrap();

        assert_eq!(queue.applied(), 40);
        assert_eq!(queue.snapshot().len(), 40);
    }

    #[test]
    fn test_failed_operation_is_retried() {
        let store = Arc::new(FlakyStore::default());
        let queue = IndexQueue::new(store.clone(), InvertedIndex::new("en", false));
        store.pages.put(PageDocument::page("A", "alpha"));
        store.pages.put(PageDocument::page("B", "beta"));
        store.failures.store(1, Ordering::SeqCst);

        queue.enqueue(PendingOp::add("A")).unwrap();
        queue.enqueue(PendingOp::delete("A")).unwrap();
        queue.enqueue(PendingOp::add("B")).unwrap();

        let err = queue.flush().unwrap_err();
        assert!(matches!(err, SearchError::FlushIncomplete { deferred: 2, .. }));
        // B does not wait on A
        assert_eq!(queue.applied(), 1);
        assert_eq!(queue.pending(), 2);
        assert!(!queue.wait_until_applied(Duration::from_millis(10)));

        // the retry keeps A's add before its delete
        assert_eq!(queue.flush().unwrap(), 2);
        assert_eq!(queue.applied(), 3);
        let index = queue.snapshot();
        assert_eq!(index.len(), 1);
        assert!(index.get(&DocumentKey::page("B")).is_some());
        assert_eq!(queue.flush().unwrap(), 0);
    }

    #[test]
    fn test_failed_add_applies_on_next_flush() {
        let store = Arc::new(FlakyStore::default());
        let queue = IndexQueue::new(store.clone(), InvertedIndex::new("en", false));
        store.pages.put(PageDocument::page("A", "alpha"));
        store.failures.store(1, Ordering::SeqCst);

        queue.enqueue(PendingOp::add("A")).unwrap();
        assert!(queue.flush().is_err());
        assert!(queue.snapshot().is_empty());

        assert_eq!(queue.flush().unwrap(), 1);
        assert!(has_word(&queue.snapshot(), "alpha"));
        assert!(queue.wait_until_applied(Duration::from_millis(10)));
    }

    #[test]
    fn test_failed_save_is_retried() {
        let temp_dir = TempDir::new().unwrap();
        // a file where the index directory should be
        let index_dir = temp_dir.path().join("index");
        std::fs::write(&index_dir, "not a directory").unwrap();

        let store = Arc::new(MemoryStore::new());
        store.put(PageDocument::page("A", "alpha"));
        let queue = IndexQueue::persistent(store.clone(), InvertedIndex::new("en", false), index_dir.clone());
        queue.enqueue(PendingOp::add("A")).unwrap();

        assert!(queue.flush().is_err());
        // searches already see the change
        assert_eq!(queue.snapshot().len(), 1);
        assert_eq!(queue.applied(), 1);

        std::fs::remove_file(&index_dir).unwrap();
        assert_eq!(queue.flush().unwrap(), 0);
        assert_eq!(InvertedIndex::load(&index_dir).unwrap().len(), 1);
    }
}
