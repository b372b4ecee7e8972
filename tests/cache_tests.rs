//! Integration tests for the LRU disk cache
//!
//! These tests verify eviction order, recency refresh on both reads and
//! writes, byte-exact payload round trips and startup truncation.

use bytes::Bytes;
use cacheproxy::cache::file_name_for;
use cacheproxy::Cache;
use std::sync::Arc;
use tempfile::TempDir;

/// Inserting one more key than capacity evicts exactly the oldest key
#[tokio::test]
async fn test_capacity_bound_evicts_oldest() {
    let temp_dir = TempDir::new().unwrap();
    let cache = Cache::open(temp_dir.path(), 3).await.unwrap();

    for key in ["/1", "/2", "/3", "/4"] {
        cache.put(key, key.as_bytes()).await.unwrap();
    }

    assert_eq!(cache.len().await, 3);
    assert!(!cache.exists("/1").await);
    for key in ["/2", "/3", "/4"] {
        assert!(cache.exists(key).await, "{} should still be resident", key);
    }
    // index and directory stay 1:1
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 3);
    assert!(!temp_dir.path().join(file_name_for("/1")).exists());
    assert_eq!(cache.stats().snapshot().evictions, 1);
}

/// The two-entry walkthrough: /a is evicted, /b survives and is promoted
#[tokio::test]
async fn test_two_entry_walkthrough() {
    let temp_dir = TempDir::new().unwrap();
    let cache = Cache::open(temp_dir.path(), 2).await.unwrap();

    cache.put("/a", b"1").await.unwrap();
    cache.put("/b", b"2").await.unwrap();
    cache.put("/c", b"3").await.unwrap();

    assert!(!cache.exists("/a").await);
    assert_eq!(cache.get("/b").await.unwrap(), Some(Bytes::from_static(b"2")));

    // /b was promoted by the get, so /c is now the oldest
    cache.put("/d", b"4").await.unwrap();
    assert!(cache.exists("/b").await);
    assert!(!cache.exists("/c").await);
}

/// A get refreshes recency even for the oldest resident key
#[tokio::test]
async fn test_get_refreshes_recency() {
    let temp_dir = TempDir::new().unwrap();
    let cache = Cache::open(temp_dir.path(), 2).await.unwrap();

    cache.put("/old", b"o").await.unwrap();
    cache.put("/new", b"n").await.unwrap();
    cache.get("/old").await.unwrap();
    cache.put("/newest", b"x").await.unwrap();

    assert!(cache.exists("/old").await);
    assert!(!cache.exists("/new").await);
}

/// A put of an existing key refreshes recency without growing the cache
#[tokio::test]
async fn test_put_refreshes_recency() {
    let temp_dir = TempDir::new().unwrap();
    let cache = Cache::open(temp_dir.path(), 2).await.unwrap();

    cache.put("/old", b"o").await.unwrap();
    cache.put("/new", b"n").await.unwrap();
    cache.put("/old", b"o2").await.unwrap();
    assert_eq!(cache.len().await, 2);

    cache.put("/newest", b"x").await.unwrap();
    assert!(cache.exists("/old").await);
    assert!(!cache.exists("/new").await);
    assert_eq!(cache.get("/old").await.unwrap(), Some(Bytes::from_static(b"o2")));
}

/// exists is a pure membership check and does not change eviction order
#[tokio::test]
async fn test_exists_does_not_touch_recency() {
    let temp_dir = TempDir::new().unwrap();
    let cache = Cache::open(temp_dir.path(), 2).await.unwrap();

    cache.put("/a", b"1").await.unwrap();
    cache.put("/b", b"2").await.unwrap();
    assert!(cache.exists("/a").await);
    cache.put("/c", b"3").await.unwrap();

    assert!(!cache.exists("/a").await);
}

/// Payloads come back byte-for-byte, including non UTF-8 data
#[tokio::test]
async fn test_binary_payload_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let cache = Cache::open(temp_dir.path(), 4).await.unwrap();

    let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    cache.put("http://127.0.0.1:8080/4096", &payload).await.unwrap();

    let read = cache.get("http://127.0.0.1:8080/4096").await.unwrap().unwrap();
    assert_eq!(read.as_ref(), payload.as_slice());
    assert!(cache.get("http://127.0.0.1:8080/missing").await.unwrap().is_none());
}

/// clear removes every entry and every backing file
#[tokio::test]
async fn test_clear_empties_index_and_directory() {
    let temp_dir = TempDir::new().unwrap();
    let cache = Cache::open(temp_dir.path(), 4).await.unwrap();

    let keys = ["/1", "/2", "/3"];
    for key in keys {
        cache.put(key, b"payload").await.unwrap();
    }
    cache.clear().await.unwrap();

    for key in keys {
        assert!(!cache.exists(key).await);
    }
    assert_eq!(cache.len().await, 0);
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
}

/// A fresh process never sees entries from a previous one
#[tokio::test]
async fn test_reopen_starts_empty() {
    let temp_dir = TempDir::new().unwrap();
    {
        let cache = Cache::open(temp_dir.path(), 2).await.unwrap();
        cache.put("/a", b"1").await.unwrap();
    }

    let cache = Cache::open(temp_dir.path(), 2).await.unwrap();
    assert!(!cache.exists("/a").await);
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
}

/// Concurrent writers never push the cache over capacity
#[tokio::test]
async fn test_concurrent_puts_respect_capacity() {
    let temp_dir = TempDir::new().unwrap();
    let cache = Arc::new(Cache::open(temp_dir.path(), 5).await.unwrap());

    let mut handles = Vec::new();
    for i in 0..50 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            let key = format!("/{}", i);
            cache.put(&key, key.as_bytes()).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(cache.len().await, 5);
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 5);
    assert_eq!(cache.stats().snapshot().evictions, 45);
}
