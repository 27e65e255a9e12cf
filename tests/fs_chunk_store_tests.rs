use bytes::Bytes;
use futures::StreamExt;
use scribe_uploads::services::chunk_store::{ByteStream, ChunkStore, FsChunkStore, bytes_stream};
use std::{io::ErrorKind, path::PathBuf};
use uuid::Uuid;

fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("scribe-uploads-fs-{}", Uuid::new_v4()))
}

async fn read_all(mut stream: ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

#[tokio::test]
async fn write_read_overwrite_delete() {
    let root = scratch_dir();
    let store = FsChunkStore::new(&root);
    let key = "uploads/abc/def/chunk_0";

    let written = store
        .write(key, bytes_stream(Bytes::from_static(b"first")), "audio/mpeg")
        .await
        .unwrap();
    assert_eq!(written, 5);
    assert_eq!(read_all(store.open_read(key).await.unwrap()).await, b"first");

    store
        .write(key, bytes_stream(Bytes::from_static(b"second")), "audio/mpeg")
        .await
        .unwrap();
    assert_eq!(read_all(store.open_read(key).await.unwrap()).await, b"second");

    // no temp files left beside the object
    let dir = root.join("uploads/abc/def");
    let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    assert_eq!(names, vec!["chunk_0".to_string()]);

    store.delete(key).await.unwrap();
    let err = match store.open_read(key).await {
        Ok(_) => panic!("object should be gone"),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // empty directories are pruned, the root stays
    assert!(!root.join("uploads").exists());
    assert!(root.exists());

    tokio::fs::remove_dir_all(&root).await.unwrap();
}

#[tokio::test]
async fn deleting_a_missing_object_is_ok() {
    let root = scratch_dir();
    let store = FsChunkStore::new(&root);
    store.delete("uploads/nothing/here").await.unwrap();
}

#[tokio::test]
async fn unsafe_keys_are_rejected() {
    let root = scratch_dir();
    let store = FsChunkStore::new(&root);

    for key in ["../escape", "/etc/passwd", "a//b", "a\\b", ""] {
        let err = store
            .write(key, bytes_stream(Bytes::from_static(b"x")), "audio/mpeg")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput, "key {key:?}");
    }
    assert!(!root.exists());
}
