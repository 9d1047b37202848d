//! Background writer that persists store snapshots without blocking the caller.
//!
//! Every mutation hands the writer an `Arc` snapshot of the entries. Snapshots
//! queued while a write is pending are coalesced, so only the newest one lands.
//! Encoding and the storage write run on the blocking pool.
//! [`Flusher::flush`] resolves once everything scheduled before it is written.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::diagnostics::DiagnosticSink;
use crate::persistence::{encode, Entries, KeyValueStorage, PersistenceError};

enum Command {
    Persist(Arc<Entries>),
    Flush(oneshot::Sender<()>),
}

/// Handle to the writer task. The task exits once this is dropped and its queue drained.
pub(crate) struct Flusher {
    tx: mpsc::UnboundedSender<Command>,
    sink: Arc<dyn DiagnosticSink>,
    /// Length of the record last read from or written to storage.
    persisted_bytes: Arc<AtomicUsize>,
}

impl Flusher {
    /// Spawns the writer on the current Tokio runtime. Returns `None` outside a runtime.
    pub fn spawn(
        storage: Arc<dyn KeyValueStorage>,
        key: String,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Option<Self> {
        let handle = Handle::try_current().ok()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let persisted_bytes = Arc::new(AtomicUsize::new(0));
        let writer = Writer {
            storage,
            key,
            sink: sink.clone(),
            persisted_bytes: persisted_bytes.clone(),
        };
        handle.spawn(writer.run(rx));
        Some(Self {
            tx,
            sink,
            persisted_bytes,
        })
    }

    pub fn schedule(&self, snapshot: Arc<Entries>) {
        if self.tx.send(Command::Persist(snapshot)).is_err() {
            self.sink
                .error("vector store writer has stopped; snapshot not persisted");
        }
    }

    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Command::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    pub fn persisted_bytes(&self) -> usize {
        self.persisted_bytes.load(Ordering::Acquire)
    }

    /// Records the size of the record found in storage when the store was opened.
    pub fn set_loaded_bytes(&self, bytes: usize) {
        self.persisted_bytes.store(bytes, Ordering::Release);
    }
}

impl std::fmt::Debug for Flusher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flusher")
            .field("persisted_bytes", &self.persisted_bytes())
            .finish_non_exhaustive()
    }
}

struct Writer {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
    sink: Arc<dyn DiagnosticSink>,
    persisted_bytes: Arc<AtomicUsize>,
}

impl Writer {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            let mut latest = None;
            let mut waiters = Vec::new();
            let mut next = Some(command);
            while let Some(command) = next {
                match command {
                    Command::Persist(snapshot) => latest = Some(snapshot),
                    Command::Flush(done) => waiters.push(done),
                }
                next = rx.try_recv().ok();
            }
            if let Some(snapshot) = latest {
                self.write(snapshot).await;
            }
            for done in waiters {
                let _ = done.send(());
            }
        }
    }

    async fn write(&self, snapshot: Arc<Entries>) {
        let storage = self.storage.clone();
        let key = self.key.clone();
        let documents = snapshot.len();
        let result = tokio::task::spawn_blocking(move || -> Result<usize, PersistenceError> {
            let json = encode(&snapshot)?;
            storage.set(&key, &json)?;
            Ok(json.len())
        })
        .await;
        let key = &self.key;
        match result {
            Ok(Ok(bytes)) => {
                self.persisted_bytes.store(bytes, Ordering::Release);
                self.sink.debug(&format!(
                    "persisted {documents} documents to {key} ({bytes} bytes)"
                ));
            }
            Ok(Err(e)) => self
                .sink
                .error(&format!("failed to persist vector store to {key}: {e}")),
            Err(e) => self
                .sink
                .error(&format!("vector store write to {key} did not complete: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::testing::RecordingSink;
    use crate::persistence::MemoryStorage;

    /// Counts writes so coalescing can be observed.
    #[derive(Default)]
    struct CountingStorage {
        inner: MemoryStorage,
        writes: AtomicUsize,
    }

    impl KeyValueStorage for CountingStorage {
        fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set(key, value)
        }
    }

    struct FailingStorage;

    impl KeyValueStorage for FailingStorage {
        fn get(&self, _key: &str) -> Result<Option<String>, PersistenceError> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), PersistenceError> {
            Err(PersistenceError::Backend("quota exceeded".into()))
        }
    }

    fn snapshot(n: usize) -> Arc<Entries> {
        let mut e = Entries::new();
        for i in 0..n {
            e.insert(format!("doc{i}"), vec![vec![i as f32]]);
        }
        Arc::new(e)
    }

    #[test]
    fn spawn_outside_runtime_is_none() {
        let flusher = Flusher::spawn(
            Arc::new(MemoryStorage::new()),
            "k".into(),
            Arc::new(RecordingSink::default()),
        );
        assert!(flusher.is_none());
    }

    #[tokio::test]
    async fn queued_snapshots_coalesce_to_latest() {
        let storage = Arc::new(CountingStorage::default());
        let flusher = Flusher::spawn(storage.clone(), "k".into(), Arc::new(RecordingSink::default())).unwrap();
        flusher.schedule(snapshot(1));
        flusher.schedule(snapshot(2));
        flusher.schedule(snapshot(3));
        flusher.flush().await;
        assert_eq!(storage.writes.load(Ordering::SeqCst), 1);
        let stored = storage.get("k").unwrap().unwrap();
        assert!(stored.contains("doc2"));
        assert_eq!(flusher.persisted_bytes(), stored.len());
    }

    #[tokio::test]
    async fn flush_with_nothing_pending_resolves() {
        let storage = Arc::new(CountingStorage::default());
        let flusher = Flusher::spawn(storage.clone(), "k".into(), Arc::new(RecordingSink::default())).unwrap();
        flusher.flush().await;
        assert_eq!(storage.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn write_fault_goes_to_sink() {
        let sink = Arc::new(RecordingSink::default());
        let flusher = Flusher::spawn(Arc::new(FailingStorage), "k".into(), sink.clone()).unwrap();
        flusher.schedule(snapshot(1));
        flusher.flush().await;
        let errors = sink.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("quota exceeded"));
        assert_eq!(flusher.persisted_bytes(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn writes_run_off_the_async_workers() {
        let storage = Arc::new(CountingStorage::default());
        let flusher = Flusher::spawn(storage.clone(), "k".into(), Arc::new(RecordingSink::default())).unwrap();
        flusher.schedule(snapshot(2));
        flusher.flush().await;
        assert_eq!(storage.writes.load(Ordering::SeqCst), 1);
        assert!(storage.get("k").unwrap().unwrap().contains("doc1"));
    }
}
