mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use flashbook::app::progress_store::{KeyValueStore, MemoryKeyValueStore, ProgressStore, keys};
use flashbook::chunker::{MAX_SERVICE_CHARS, char_len};
use flashbook::formats::{Book, PendingSource, Snapshot};
use scripted::{Reply, ScriptedSummarizer, paragraphs, pipeline_with, test_config};

#[tokio::test]
async fn local_fs_snapshot_survives_a_reload() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let store = ProgressStore::local_fs(temp.path());

    let snapshot = Snapshot {
        book: Some(Book::with_placeholders(
            "book_00aa".to_owned(),
            "Harbor".to_owned(),
            "A. Writer".to_owned(),
            2,
        )),
        raw_chunks: vec!["first chunk".to_owned(), "second chunk".to_owned()],
        processed: vec![1],
        book_id: Some("book_00aa".to_owned()),
        book_title: Some("Harbor".to_owned()),
        pending_source: None,
        saved_at: Some(Utc::now()),
    };
    store.save(&snapshot).await?;

    assert!(temp.path().join("state").join("current_book.value").is_file());
    let stored = std::fs::read_to_string(temp.path().join("state").join("processed_chapters.value"))?;
    assert_eq!(stored, r#"["1"]"#);

    let reloaded = ProgressStore::local_fs(temp.path()).load().await?;
    assert_eq!(reloaded, Some(snapshot));
    Ok(())
}

#[tokio::test]
async fn resumed_pipeline_skips_processed_chunks() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;

    let first = ScriptedSummarizer::new(Reply::Blocks);
    let pipeline = pipeline_with(
        test_config(),
        first.clone(),
        ProgressStore::local_fs(temp.path()),
    );
    pipeline.ingest_text("Harbor", "A", &paragraphs(5)).await?;
    pipeline.on_init().await;
    pipeline.wait_for_background().await;
    assert_eq!(first.call_count(), 3);
    let before = pipeline.book();
    drop(pipeline);

    let second = ScriptedSummarizer::new(Reply::Blocks);
    let resumed = pipeline_with(
        test_config(),
        second.clone(),
        ProgressStore::local_fs(temp.path()),
    );
    assert!(resumed.restore().await);
    assert_eq!(resumed.book(), before);
    assert_eq!(resumed.status().unwrap().processed, vec![0, 1, 2]);

    resumed.on_chunk_viewed(1).await;
    let titles = second
        .calls()
        .into_iter()
        .map(|call| call.chapter_title)
        .collect::<Vec<_>>();
    assert_eq!(titles, vec!["Chapter 4"]);
    assert_eq!(resumed.status().unwrap().processed, vec![0, 1, 2, 3]);
    Ok(())
}

#[tokio::test]
async fn pending_source_is_ingested_on_restore() -> anyhow::Result<()> {
    let kv = Arc::new(MemoryKeyValueStore::new());
    let store = ProgressStore::new(kv.clone());
    let text = paragraphs(2);
    store
        .save(&Snapshot {
            pending_source: Some(PendingSource {
                path: "/books/the_long_walk.txt".to_owned(),
                content: text.clone(),
                title: None,
                author: None,
            }),
            ..Snapshot::empty()
        })
        .await?;

    let summarizer = ScriptedSummarizer::new(Reply::Blocks);
    let pipeline = pipeline_with(test_config(), summarizer.clone(), store.clone());
    assert!(pipeline.restore().await);

    let book = pipeline.book().expect("book");
    assert_eq!(book.title, "the long walk");
    assert_eq!(book.author, "Unknown");
    assert_eq!(pipeline.chunk_count(), 2);
    assert!(book.chapters.iter().all(|ch| ch.is_loading()));
    assert_eq!(summarizer.call_count(), 0);

    let stored = store.load().await?.expect("snapshot");
    assert_eq!(stored.pending_source, None);
    assert_eq!(stored.raw_chunks.len(), 2);
    Ok(())
}

#[tokio::test]
async fn pending_ingest_keeps_the_requested_title_and_author() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let store = ProgressStore::local_fs(temp.path());
    store
        .save(&Snapshot {
            pending_source: Some(PendingSource {
                path: "/books/the_long_walk.txt".to_owned(),
                content: paragraphs(1),
                title: Some("The Long Walk Home".to_owned()),
                author: Some("C. Walker".to_owned()),
            }),
            ..Snapshot::empty()
        })
        .await?;

    let pipeline = pipeline_with(
        test_config(),
        ScriptedSummarizer::new(Reply::Blocks),
        ProgressStore::local_fs(temp.path()),
    );
    assert!(pipeline.restore().await);

    let book = pipeline.book().expect("book");
    assert_eq!(book.title, "The Long Walk Home");
    assert_eq!(book.author, "C. Walker");
    Ok(())
}

#[tokio::test]
async fn oversized_restored_chunk_is_cut_before_sending() -> anyhow::Result<()> {
    let raw = "word ".repeat(4_000);
    assert_eq!(char_len(&raw), 20_000);

    let store = ProgressStore::in_memory();
    store
        .save(&Snapshot {
            book: Some(Book::with_placeholders(
                "book_big".to_owned(),
                "Big".to_owned(),
                "A".to_owned(),
                1,
            )),
            raw_chunks: vec![raw],
            book_id: Some("book_big".to_owned()),
            book_title: Some("Big".to_owned()),
            ..Snapshot::empty()
        })
        .await?;

    let summarizer = ScriptedSummarizer::new(Reply::Blocks);
    let pipeline = pipeline_with(test_config(), summarizer.clone(), store);
    assert!(pipeline.restore().await);

    pipeline.process(0).await;

    let calls = summarizer.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(char_len(&calls[0].text_chunk), MAX_SERVICE_CHARS);
    assert_eq!(MAX_SERVICE_CHARS, 15_000);
    assert_eq!(pipeline.status().unwrap().processed, vec![0]);
    Ok(())
}

#[tokio::test]
async fn inconsistent_snapshot_is_ignored() -> anyhow::Result<()> {
    let store = ProgressStore::in_memory();
    store
        .save(&Snapshot {
            book: Some(Book::with_placeholders(
                "book_1".to_owned(),
                "T".to_owned(),
                "A".to_owned(),
                3,
            )),
            raw_chunks: vec!["only one".to_owned()],
            book_id: Some("book_1".to_owned()),
            ..Snapshot::empty()
        })
        .await?;

    let pipeline = pipeline_with(test_config(), ScriptedSummarizer::new(Reply::Blocks), store);
    assert!(!pipeline.restore().await);
    assert!(pipeline.book().is_none());
    Ok(())
}

struct BrokenStore;

#[async_trait]
impl KeyValueStore for BrokenStore {
    async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
        anyhow::bail!("storage unavailable")
    }

    async fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
        anyhow::bail!("storage unavailable")
    }

    async fn remove(&self, _key: &str) -> anyhow::Result<()> {
        anyhow::bail!("storage unavailable")
    }
}

#[tokio::test]
async fn storage_failures_do_not_stop_processing() -> anyhow::Result<()> {
    let summarizer = ScriptedSummarizer::new(Reply::Blocks);
    let pipeline = pipeline_with(
        test_config(),
        summarizer.clone(),
        ProgressStore::new(Arc::new(BrokenStore)),
    );

    assert!(!pipeline.restore().await);
    pipeline.ingest_text("T", "A", &paragraphs(3)).await?;
    pipeline.on_init().await;
    pipeline.wait_for_background().await;

    assert_eq!(pipeline.status().unwrap().processed, vec![0, 1, 2]);
    assert_eq!(summarizer.call_count(), 3);

    pipeline.clear().await;
    assert!(pipeline.book().is_none());
    Ok(())
}

#[tokio::test]
async fn clear_purges_every_stored_key() -> anyhow::Result<()> {
    let kv = Arc::new(MemoryKeyValueStore::new());
    let pipeline = pipeline_with(
        test_config(),
        ScriptedSummarizer::new(Reply::Blocks),
        ProgressStore::new(kv.clone()),
    );
    pipeline.ingest_text("T", "A", &paragraphs(2)).await?;
    pipeline.process(0).await;
    assert!(kv.get(keys::CURRENT_BOOK).await?.is_some());

    pipeline.clear().await;
    for key in keys::ALL {
        assert_eq!(kv.get(key).await?, None, "key {key} survived clear");
    }
    assert!(!pipeline.restore().await);
    Ok(())
}
