#![allow(missing_docs)]

use std::sync::{Arc, Barrier};
use std::thread;

use blobkv::{AppendPrependResult, BufferedSource, Result, Store, StoreOptions, SyncSetting};
use tempfile::tempdir;

const THREADS: usize = 6;
const OPS_PER_THREAD: usize = 60;
const CHUNK: usize = 300;

fn shared_store(name: &str) -> Result<(tempfile::TempDir, Arc<Store>)> {
    let dir = tempdir().unwrap();
    let store = Store::create(
        dir.path().join(name),
        StoreOptions {
            synchronous: SyncSetting::Off,
            latch_timeout_ms: 30_000,
            ..StoreOptions::default()
        },
    )?;
    Ok((dir, Arc::new(store)))
}

fn chunk_tag(bytes: &[u8]) -> u8 {
    bytes[0]
}

#[test]
fn appenders_and_prependers_share_one_value() -> Result<()> {
    let (_dir, store) = shared_store("shared.db")?;
    store.set(b"log", BufferedSource::from(vec![0xEE; CHUNK]))?;

    let barrier = Arc::new(Barrier::new(THREADS + 1));
    let mut handles = Vec::new();
    for t in 0..THREADS {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<()> {
            barrier.wait();
            let chunk = vec![t as u8; CHUNK];
            for _ in 0..OPS_PER_THREAD {
                let result = if t % 2 == 0 {
                    store.append(b"log", BufferedSource::from(chunk.clone()))?
                } else {
                    store.prepend(b"log", BufferedSource::from(chunk.clone()))?
                };
                assert_eq!(result, AppendPrependResult::Success);
            }
            Ok(())
        }));
    }

    // Concurrent readers always see whole chunks.
    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || -> Result<()> {
            barrier.wait();
            for _ in 0..100 {
                let value = store.get(b"log")?.expect("value present").value;
                assert_eq!(value.len() % CHUNK, 0);
            }
            Ok(())
        })
    };

    for handle in handles {
        handle.join().expect("writer panicked")?;
    }
    reader.join().expect("reader panicked")?;

    let value = store.get(b"log")?.expect("value present").value;
    assert_eq!(value.len(), CHUNK * (1 + THREADS * OPS_PER_THREAD));

    let mut per_thread = [0usize; THREADS];
    let mut seed_position = None;
    for (i, chunk) in value.chunks(CHUNK).enumerate() {
        assert!(chunk.iter().all(|b| *b == chunk[0]), "torn chunk at {i}");
        match chunk_tag(chunk) {
            0xEE => seed_position = Some(i),
            t => per_thread[t as usize] += 1,
        }
    }
    assert_eq!(per_thread, [OPS_PER_THREAD; THREADS]);

    // Prepended chunks sit before the seed and appended chunks after it.
    let seed = seed_position.expect("seed chunk survives");
    for (i, chunk) in value.chunks(CHUNK).enumerate() {
        let tag = chunk_tag(chunk);
        if tag == 0xEE {
            continue;
        }
        if tag % 2 == 0 {
            assert!(i > seed, "appended chunk {i} before seed {seed}");
        } else {
            assert!(i < seed, "prepended chunk {i} after seed {seed}");
        }
    }
    assert_eq!(store.stats().latches.timeouts, 0);
    Ok(())
}

#[test]
fn independent_keys_grow_in_parallel() -> Result<()> {
    let (_dir, store) = shared_store("independent.db")?;
    for t in 0..THREADS {
        store.set(format!("key-{t}").as_bytes(), BufferedSource::from(Vec::new()))?;
    }

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Result<()> {
                let key = format!("key-{t}");
                barrier.wait();
                for i in 0..OPS_PER_THREAD {
                    let byte = [i as u8];
                    store.append(key.as_bytes(), BufferedSource::from(byte.to_vec()))?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer panicked")?;
    }

    let expected: Vec<u8> = (0..OPS_PER_THREAD).map(|i| i as u8).collect();
    for t in 0..THREADS {
        let value = store.get(format!("key-{t}").as_bytes())?.expect("value present");
        assert_eq!(value.value, expected);
    }
    let stats = store.stats();
    assert_eq!(
        stats.btree.modify_commits,
        (THREADS + THREADS * OPS_PER_THREAD) as u64
    );
    assert!(stats.btree.early_meta_releases > 0);
    Ok(())
}
