#![allow(missing_docs)]

use std::path::Path;

use blobkv::{
    AppendPrependResult, BufferedSource, CasTime, Direction, KvError, OrderToken, Result,
    SetResult, Store, StoreOptions, SyncSetting,
};
use proptest::prelude::*;
use tempfile::tempdir;

const MAX_IN_NODE: usize = 100;
const MAX_VALUE: usize = 100_000;

/// 1 KiB pages so values span many blocks quickly.
fn small_options() -> StoreOptions {
    StoreOptions {
        page_size: 1024,
        cache_pages: 64,
        synchronous: SyncSetting::Off,
        max_key_size: 64,
        max_value_size: MAX_VALUE,
        max_in_node_value_size: MAX_IN_NODE,
        ..StoreOptions::default()
    }
}

fn create(path: &Path) -> Result<Store> {
    Store::create(path, small_options())
}

fn src(bytes: &[u8]) -> BufferedSource {
    BufferedSource::from(bytes.to_vec())
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| seed.wrapping_add((i % 253) as u8))
        .collect()
}

fn value_of(store: &Store, key: &[u8]) -> Result<Option<Vec<u8>>> {
    Ok(store.get(key)?.map(|stored| stored.value))
}

#[test]
fn hello_world() -> Result<()> {
    let dir = tempdir().unwrap();
    let store = create(&dir.path().join("hello.db"))?;
    assert_eq!(store.set(b"greeting", src(b"hello"))?, SetResult::Stored);
    assert_eq!(
        store.append(b"greeting", src(b" world"))?,
        AppendPrependResult::Success
    );
    assert_eq!(value_of(&store, b"greeting")?, Some(b"hello world".to_vec()));
    assert_eq!(
        store.prepend(b"greeting", src(b">> "))?,
        AppendPrependResult::Success
    );
    assert_eq!(
        value_of(&store, b"greeting")?,
        Some(b">> hello world".to_vec())
    );
    Ok(())
}

#[test]
fn alternating_growth_across_block_boundaries() -> Result<()> {
    let dir = tempdir().unwrap();
    let path = dir.path().join("alternate.db");
    let mut expected = b"seed".to_vec();
    {
        let store = create(&path)?;
        store.set(b"k", src(&expected))?;
        let steps = [
            (Direction::Append, 50usize),
            (Direction::Prepend, 60),
            (Direction::Append, 991),
            (Direction::Prepend, 1),
            (Direction::Prepend, 992),
            (Direction::Append, 2500),
            (Direction::Prepend, 3001),
            (Direction::Append, 0),
            (Direction::Prepend, 0),
        ];
        for (i, (direction, len)) in steps.into_iter().enumerate() {
            let payload = pattern(len, i as u8);
            let result = match direction {
                Direction::Append => store.append(b"k", src(&payload))?,
                Direction::Prepend => store.prepend(b"k", src(&payload))?,
            };
            assert_eq!(result, AppendPrependResult::Success, "step {i}");
            match direction {
                Direction::Append => expected.extend_from_slice(&payload),
                Direction::Prepend => {
                    let mut grown = payload;
                    grown.extend_from_slice(&expected);
                    expected = grown;
                }
            }
            assert_eq!(value_of(&store, b"k")?.as_deref(), Some(&expected[..]), "step {i}");
        }
    }
    let store = Store::open(&path, small_options())?;
    assert_eq!(value_of(&store, b"k")?, Some(expected));
    Ok(())
}

#[test]
fn size_limit_is_checked_before_mutation() -> Result<()> {
    let dir = tempdir().unwrap();
    let store = create(&dir.path().join("limit.db"))?;
    let base = pattern(MAX_VALUE - 10, 9);
    store.set(b"big", src(&base))?;
    let before = store.get(b"big")?.expect("stored");
    let commits = store.stats().pager.commits;

    assert_eq!(store.append(b"big", src(&[0; 11]))?, AppendPrependResult::TooLarge);
    assert_eq!(store.prepend(b"big", src(&[0; 11]))?, AppendPrependResult::TooLarge);
    assert_eq!(store.get(b"big")?, Some(before));
    assert_eq!(store.stats().pager.commits, commits);

    assert_eq!(store.prepend(b"big", src(&[1; 10]))?, AppendPrependResult::Success);
    assert_eq!(store.append(b"big", src(&[2]))?, AppendPrependResult::TooLarge);
    let value = value_of(&store, b"big")?.expect("stored");
    assert_eq!(value.len(), MAX_VALUE);
    assert_eq!(&value[..10], &[1; 10]);
    assert_eq!(&value[10..], &base[..]);
    Ok(())
}

#[test]
fn missing_keys_are_reported_and_left_absent() -> Result<()> {
    let dir = tempdir().unwrap();
    let store = create(&dir.path().join("missing.db"))?;
    assert_eq!(store.append(b"nope", src(b"x"))?, AppendPrependResult::NotFound);
    store.set(b"gone", src(b"soon"))?;
    store.delete(b"gone")?;
    assert_eq!(store.prepend(b"gone", src(b"x"))?, AppendPrependResult::NotFound);
    assert_eq!(store.get(b"nope")?, None);
    assert_eq!(store.get(b"gone")?, None);
    assert_eq!(store.stats().btree.modify_noops, 2);
    Ok(())
}

#[test]
fn explicit_castime_and_order_tokens() -> Result<()> {
    let dir = tempdir().unwrap();
    let store = create(&dir.path().join("order.db"))?;
    store.set(b"k", src(b"a"))?;

    let stamped = CasTime::new(77, 1_700_000_000);
    let result = store.append_prepend(
        b"k",
        src(b"b"),
        Direction::Append,
        stamped,
        OrderToken::new(1, 5),
    )?;
    assert_eq!(result, AppendPrependResult::Success);
    assert_eq!(store.get(b"k")?.expect("stored").castime, stamped);

    let err = store.append_prepend(
        b"k",
        src(b"c"),
        Direction::Append,
        CasTime::new(78, 0),
        OrderToken::new(1, 4),
    );
    assert!(matches!(err, Err(KvError::OrderViolation { bucket: 1, .. })));
    assert_eq!(value_of(&store, b"k")?, Some(b"ab".to_vec()));

    // A different bucket is unaffected.
    store.append_prepend(
        b"k",
        src(b"c"),
        Direction::Prepend,
        CasTime::new(79, 0),
        OrderToken::new(2, 1),
    )?;
    assert_eq!(value_of(&store, b"k")?, Some(b"cab".to_vec()));
    Ok(())
}

#[derive(Clone, Debug)]
struct Step {
    prepend: bool,
    payload: Vec<u8>,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    (any::<bool>(), prop::collection::vec(any::<u8>(), 0..1500))
        .prop_map(|(prepend, payload)| Step { prepend, payload })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn growth_concatenates_and_sums_sizes(
        initial in prop::collection::vec(any::<u8>(), 0..300),
        steps in prop::collection::vec(step_strategy(), 1..8),
    ) {
        let dir = tempdir().unwrap();
        let store = create(&dir.path().join("prop.db")).unwrap();
        store.set(b"p", src(&initial)).unwrap();
        let mut expected = initial;
        for step in steps {
            let before = expected.len();
            let result = if step.prepend {
                store.prepend(b"p", src(&step.payload)).unwrap()
            } else {
                store.append(b"p", src(&step.payload)).unwrap()
            };
            prop_assert_eq!(result, AppendPrependResult::Success);
            if step.prepend {
                let mut grown = step.payload.clone();
                grown.extend_from_slice(&expected);
                expected = grown;
            } else {
                expected.extend_from_slice(&step.payload);
            }
            let stored = store.get(b"p").unwrap().expect("value present");
            prop_assert_eq!(stored.value.len(), before + step.payload.len());
            prop_assert_eq!(&stored.value, &expected);
        }
    }
}
