#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs::{self, File};

use blobkv::{
    AppendPrependResult, BufferedSource, DeleteResult, KvError, ReaderSource, Result, SetResult,
    Store, StoreOptions, SyncSetting,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;

fn fast_options() -> StoreOptions {
    StoreOptions {
        synchronous: SyncSetting::Off,
        ..StoreOptions::default()
    }
}

#[test]
fn set_get_delete_round() -> Result<()> {
    let dir = tempdir().unwrap();
    let store = Store::create(dir.path().join("basic.db"), fast_options())?;
    assert_eq!(store.get(b"k")?, None);
    assert_eq!(store.set(b"k", BufferedSource::from(&b"one"[..]))?, SetResult::Stored);
    assert_eq!(store.set(b"k", BufferedSource::from(&b"two"[..]))?, SetResult::Stored);
    assert_eq!(store.get(b"k")?.map(|v| v.value), Some(b"two".to_vec()));
    assert_eq!(store.delete(b"k")?, DeleteResult::Deleted);
    assert_eq!(store.delete(b"k")?, DeleteResult::NotFound);
    assert_eq!(store.get(b"k")?, None);
    Ok(())
}

#[test]
fn open_requires_an_existing_database() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.db");
    assert!(Store::open(&path, fast_options()).is_err());
    assert!(!path.exists());
}

#[test]
fn keys_are_validated() -> Result<()> {
    let dir = tempdir().unwrap();
    let store = Store::create(dir.path().join("keys.db"), fast_options())?;
    assert!(matches!(
        store.set(b"", BufferedSource::from(&b"v"[..])),
        Err(KvError::Invalid(_))
    ));
    let long = vec![b'k'; 251];
    assert!(matches!(store.get(&long), Err(KvError::Invalid(_))));
    Ok(())
}

#[test]
fn values_stream_from_files() -> Result<()> {
    let dir = tempdir().unwrap();
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i * 7 % 256) as u8).collect();
    let file_path = dir.path().join("payload.bin");
    fs::write(&file_path, &payload)?;

    let store = Store::create(dir.path().join("stream.db"), fast_options())?;
    let source = ReaderSource::new(File::open(&file_path)?, payload.len());
    assert_eq!(store.set(b"file", source)?, SetResult::Stored);
    let source = ReaderSource::new(File::open(&file_path)?, 100);
    assert_eq!(store.append(b"file", source)?, AppendPrependResult::Success);

    let mut expected = payload.clone();
    expected.extend_from_slice(&payload[..100]);
    assert_eq!(store.get(b"file")?.map(|v| v.value), Some(expected));
    Ok(())
}

#[test]
fn random_workload_matches_model_across_reopen() -> Result<()> {
    let dir = tempdir().unwrap();
    let path = dir.path().join("random.db");
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed_b10b);
    let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    {
        let store = Store::create(&path, fast_options())?;
        for _ in 0..1500 {
            let key = format!("key-{:04}", rng.gen_range(0..300)).into_bytes();
            let len = if rng.gen_bool(0.1) {
                rng.gen_range(250..6000)
            } else {
                rng.gen_range(0..120)
            };
            let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            match rng.gen_range(0..10) {
                0..=3 => {
                    store.set(&key, BufferedSource::from(payload.clone()))?;
                    model.insert(key, payload);
                }
                4..=5 => {
                    let result = store.append(&key, BufferedSource::from(payload.clone()))?;
                    match model.get_mut(&key) {
                        Some(value) => {
                            assert_eq!(result, AppendPrependResult::Success);
                            value.extend_from_slice(&payload);
                        }
                        None => assert_eq!(result, AppendPrependResult::NotFound),
                    }
                }
                6..=7 => {
                    let result = store.prepend(&key, BufferedSource::from(payload.clone()))?;
                    match model.get_mut(&key) {
                        Some(value) => {
                            assert_eq!(result, AppendPrependResult::Success);
                            let mut grown = payload;
                            grown.extend_from_slice(value);
                            *value = grown;
                        }
                        None => assert_eq!(result, AppendPrependResult::NotFound),
                    }
                }
                _ => {
                    let result = store.delete(&key)?;
                    let expected = if model.remove(&key).is_some() {
                        DeleteResult::Deleted
                    } else {
                        DeleteResult::NotFound
                    };
                    assert_eq!(result, expected);
                }
            }
        }
        for (key, value) in &model {
            assert_eq!(store.get(key)?.map(|v| v.value).as_ref(), Some(value));
        }
    }

    let store = Store::open(&path, fast_options())?;
    for i in 0..300 {
        let key = format!("key-{i:04}").into_bytes();
        assert_eq!(store.get(&key)?.map(|v| v.value), model.get(&key).cloned());
    }
    Ok(())
}

#[test]
fn options_load_from_toml() -> Result<()> {
    let dir = tempdir().unwrap();
    let config = dir.path().join("blobkv.toml");
    fs::write(
        &config,
        "page_size = 8192\nsynchronous = \"off\"\nmax_value_size = 65536\n",
    )?;
    let options = StoreOptions::from_file(&config)?;
    let store = Store::create(dir.path().join("configured.db"), options)?;
    assert_eq!(store.slice().layout().page_size(), 8192);
    assert_eq!(
        store.set(b"k", BufferedSource::from(vec![1u8; 65_537]))?,
        SetResult::TooLarge
    );
    Ok(())
}
