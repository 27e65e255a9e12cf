//! Shared fixtures: an in-memory SQLite session store plus in-memory
//! doubles for chunk storage, media probing and plan lookup.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use scribe_uploads::{
    config::UploadPolicy,
    models::plan::{PlanDefinition, PlanTier},
    services::{
        chunk_store::{ByteStream, ChunkStore},
        errors::{UploadError, UploadResult},
        media_probe::MediaProbe,
        plan_guard::PlanResolver,
        session_store::{SqliteSessionStore, run_migrations},
        upload_service::{CreateSessionRequest, UploadService},
    },
};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::{
    collections::HashMap,
    io,
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::Barrier;

pub const OWNER: &str = "owner-1";

/// Single-connection in-memory database with the schema applied.
pub async fn memory_pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("connect in-memory sqlite");
    run_migrations(&pool).await.expect("migrate");
    Arc::new(pool)
}

/// Chunk store backed by a `HashMap`, with write counting and failure injection.
#[derive(Default)]
pub struct MemoryChunkStore {
    objects: Mutex<HashMap<String, Bytes>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryChunkStore {
    pub fn get(&self, path: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(path).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn chunk_keys(&self) -> Vec<String> {
        self.keys()
            .into_iter()
            .filter(|k| k.contains("/chunk_"))
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn write(&self, path: &str, mut body: ByteStream, _content_type: &str) -> io::Result<u64> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::other("injected write failure"));
        }
        let mut buf = Vec::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let len = buf.len() as u64;
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), Bytes::from(buf));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(len)
    }

    async fn open_read(&self, path: &str) -> io::Result<ByteStream> {
        let data = self
            .get(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))?;
        Ok(Box::pin(futures::stream::iter(vec![Ok(data)])))
    }

    async fn delete(&self, path: &str) -> io::Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(io::Error::other("injected delete failure"));
        }
        self.objects.lock().unwrap().remove(path);
        Ok(())
    }
}

/// Holds writes whose path ends with `suffix` until `parties` of them have arrived.
pub struct GatedChunkStore {
    pub inner: Arc<MemoryChunkStore>,
    suffix: String,
    barrier: Barrier,
}

impl GatedChunkStore {
    pub fn new(inner: Arc<MemoryChunkStore>, suffix: &str, parties: usize) -> Self {
        Self {
            inner,
            suffix: suffix.to_string(),
            barrier: Barrier::new(parties),
        }
    }
}

#[async_trait]
impl ChunkStore for GatedChunkStore {
    async fn write(&self, path: &str, body: ByteStream, content_type: &str) -> io::Result<u64> {
        if path.ends_with(&self.suffix) {
            self.barrier.wait().await;
        }
        self.inner.write(path, body, content_type).await
    }

    async fn open_read(&self, path: &str) -> io::Result<ByteStream> {
        self.inner.open_read(path).await
    }

    async fn delete(&self, path: &str) -> io::Result<()> {
        self.inner.delete(path).await
    }
}

/// Probe that reports a fixed duration, or fails as unreadable.
pub struct StaticProbe {
    pub duration: Option<Duration>,
    pub calls: AtomicUsize,
}

impl StaticProbe {
    pub fn minutes(minutes: u64) -> Self {
        Self {
            duration: Some(Duration::from_secs(minutes * 60)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unreadable() -> Self {
        Self {
            duration: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MediaProbe for StaticProbe {
    async fn duration(&self, path: &Path) -> UploadResult<Duration> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(path.exists(), "probe called on missing merge file {path:?}");
        self.duration
            .ok_or_else(|| UploadError::UnreadableMedia("no audio stream".into()))
    }
}

/// Every owner is on the same plan.
pub struct StaticPlans(pub PlanDefinition);

#[async_trait]
impl PlanResolver for StaticPlans {
    async fn resolve(&self, _owner_id: &str) -> UploadResult<PlanDefinition> {
        Ok(self.0.clone())
    }
}

pub struct Harness {
    pub db: Arc<SqlitePool>,
    pub store: Arc<SqliteSessionStore>,
    pub chunks: Arc<MemoryChunkStore>,
    pub probe: Arc<StaticProbe>,
    pub service: UploadService,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with(StaticProbe::minutes(5), PlanTier::Free).await
    }

    pub async fn with(probe: StaticProbe, tier: PlanTier) -> Self {
        Self::with_plan(probe, PlanDefinition::for_tier(tier)).await
    }

    pub async fn with_plan(probe: StaticProbe, plan: PlanDefinition) -> Self {
        let chunks = Arc::new(MemoryChunkStore::default());
        Self::build(probe, plan, chunks.clone(), chunks).await
    }

    /// Build with `chunk_store` in the service while `chunks` observes the objects.
    pub async fn build(
        probe: StaticProbe,
        plan: PlanDefinition,
        chunks: Arc<MemoryChunkStore>,
        chunk_store: Arc<dyn ChunkStore>,
    ) -> Self {
        let db = memory_pool().await;
        let store = Arc::new(SqliteSessionStore::new(db.clone()));
        let probe = Arc::new(probe);
        let service = UploadService::new(
            store.clone(),
            chunk_store,
            probe.clone(),
            Arc::new(StaticPlans(plan)),
            UploadPolicy::default(),
        );
        Self {
            db,
            store,
            chunks,
            probe,
            service,
        }
    }

    pub async fn media_file_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM media_files")
            .fetch_one(&*self.db)
            .await
            .unwrap()
    }
}

pub fn request(total_size_bytes: i64, chunk_size_bytes: i64) -> CreateSessionRequest {
    CreateSessionRequest {
        file_name: "interview.mp3".into(),
        content_type: Some("audio/mpeg".into()),
        total_size_bytes: Some(total_size_bytes),
        chunk_size_bytes,
        total_chunks: None,
        duration_minutes: None,
    }
}

/// Deterministic payload where byte `i` of the file is `i % 251`.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Slice `data` into `chunk_size` pieces.
pub fn split(data: &[u8], chunk_size: usize) -> Vec<Bytes> {
    data.chunks(chunk_size)
        .map(Bytes::copy_from_slice)
        .collect()
}
