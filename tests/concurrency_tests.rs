mod common;

use bytes::Bytes;
use common::{GatedChunkStore, Harness, MemoryChunkStore, OWNER, StaticProbe, payload, request, split};
use scribe_uploads::{
    models::{
        plan::{PlanDefinition, PlanTier},
        upload_session::UploadSessionStatus,
    },
    services::{session_store::SessionStore, upload_service::ChunkOutcome},
};
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_final_chunks_assemble_once() {
    let chunks = Arc::new(MemoryChunkStore::default());
    let gated = Arc::new(GatedChunkStore::new(chunks.clone(), "/chunk_1", 2));
    let h = Harness::build(
        StaticProbe::minutes(5),
        PlanDefinition::for_tier(PlanTier::Free),
        chunks,
        gated,
    )
    .await;

    let session = h
        .service
        .create_session(OWNER, request(200, 100))
        .await
        .unwrap();
    h.service
        .upload_chunk(session.id, OWNER, 0, Bytes::from(payload(100)))
        .await
        .unwrap();

    // both callers load the session before either records chunk 1
    let last = Bytes::from(payload(100));
    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let service = h.service.clone();
            let body = last.clone();
            tokio::spawn(async move { service.upload_chunk(session.id, OWNER, 1, body).await })
        })
        .collect();

    let mut media_ids = Vec::new();
    for task in tasks {
        match task.await.unwrap().unwrap() {
            ChunkOutcome::Completed { media_file } => media_ids.push(media_file.id),
            other => panic!("expected completed outcome, got {other:?}"),
        }
    }
    assert_eq!(media_ids.len(), 2);
    assert_eq!(media_ids[0], media_ids[1]);
    assert_eq!(h.media_file_count().await, 1);

    let stored = h.store.load(session.id, OWNER).await.unwrap().unwrap();
    assert_eq!(stored.status, UploadSessionStatus::Completed);
    assert_eq!(stored.media_file_id, Some(media_ids[0]));
    assert_eq!(stored.received_chunks_count, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_chunks_are_all_recorded() {
    let h = Harness::new().await;
    let data = payload(800);
    let session = h
        .service
        .create_session(OWNER, request(800, 100))
        .await
        .unwrap();
    assert_eq!(session.total_chunks, 8);

    let tasks: Vec<_> = split(&data, 100)
        .into_iter()
        .enumerate()
        .map(|(index, body)| {
            let service = h.service.clone();
            tokio::spawn(async move {
                service
                    .upload_chunk(session.id, OWNER, index as u32, body)
                    .await
            })
        })
        .collect();

    let mut completed = Vec::new();
    let mut incomplete = 0;
    for task in tasks {
        match task.await.unwrap().unwrap() {
            ChunkOutcome::Completed { media_file } => completed.push(media_file),
            ChunkOutcome::Incomplete { total_chunks, .. } => {
                assert_eq!(total_chunks, 8);
                incomplete += 1;
            }
        }
    }
    assert_eq!(completed.len(), 1, "exactly one caller observes completion");
    assert_eq!(incomplete, 7);

    let media = &completed[0];
    assert_eq!(media.size_bytes, 800);
    assert_eq!(
        h.chunks.get(&media.storage_path).unwrap().as_ref(),
        data.as_slice()
    );

    let stored = h.store.load(session.id, OWNER).await.unwrap().unwrap();
    assert_eq!(stored.received_chunks_count, 8);
    assert_eq!(stored.received_chunk_indices.len(), 8);
    assert_eq!(h.media_file_count().await, 1);
}
