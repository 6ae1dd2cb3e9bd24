//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the size bound, eviction order, overwrite and
//! clear semantics over arbitrary operation sequences.

use proptest::prelude::*;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};

use crate::cache::{normalize, Cache, CacheKey, CacheOptions, RemovalReason, RemovedItem};

// == Test Configuration ==
const TEST_MAX_SIZE: usize = 8;

// == Strategies ==
/// Generates keys from a small alphabet so operations collide often
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-l]{1,2}"
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, value: u32 },
    Get { key: String },
    Remove { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        3 => (key_strategy(), any::<u32>()).prop_map(|(key, value)| CacheOp::Set { key, value }),
        1 => key_strategy().prop_map(|key| CacheOp::Get { key }),
        1 => key_strategy().prop_map(|key| CacheOp::Remove { key }),
    ]
}

fn opts() -> CacheOptions<u32> {
    CacheOptions::new()
}

fn live_keys(cache: &Cache<u32>) -> Vec<String> {
    let mut keys = Vec::new();
    cache.enumerate(|key, _| {
        keys.push(key.to_string());
        ControlFlow::Continue(())
    });
    keys
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Any operation sequence behaves like a bounded insertion-ordered map:
    // size never exceeds the cap and the evicted entry is always the oldest.
    #[test]
    fn prop_matches_insertion_ordered_model(ops in prop::collection::vec(cache_op_strategy(), 1..80)) {
        let cache = Cache::with_max_size(TEST_MAX_SIZE).unwrap();
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let evicted_clone = Arc::clone(&evicted);
        cache.item_removed().add(move |item: &RemovedItem<u32>| {
            if item.reason == RemovalReason::Underused {
                evicted_clone.lock().unwrap().push(item.identifier.clone());
            }
        });

        let mut model: VecDeque<(String, u32)> = VecDeque::new();

        for op in ops {
            match op {
                CacheOp::Set { key, value } => {
                    model.retain(|(k, _)| *k != key);
                    let expected_eviction = if model.len() == TEST_MAX_SIZE {
                        model.pop_front().map(|(k, _)| k)
                    } else {
                        None
                    };
                    model.push_back((key.clone(), value));

                    evicted.lock().unwrap().clear();
                    cache.set(key, value, opts()).unwrap();
                    let actual: Vec<String> = evicted.lock().unwrap().clone();
                    prop_assert_eq!(actual, expected_eviction.into_iter().collect::<Vec<_>>());
                }
                CacheOp::Get { key } => {
                    let expected = model.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);
                    prop_assert_eq!(cache.get(key).unwrap(), expected);
                }
                CacheOp::Remove { key } => {
                    let existed = model.iter().any(|(k, _)| *k == key);
                    model.retain(|(k, _)| *k != key);
                    prop_assert_eq!(cache.remove(key).unwrap(), existed);
                }
            }

            prop_assert!(cache.size() <= TEST_MAX_SIZE);
            prop_assert_eq!(cache.size(), model.len());
        }

        let expected: Vec<String> = model.iter().map(|(k, _)| k.clone()).collect();
        prop_assert_eq!(live_keys(&cache), expected);
    }

    // Overwriting reports Overwritten with the old value before the new value is visible.
    #[test]
    fn prop_overwrite_reports_old_value(key in key_strategy(), first in any::<u32>(), second in any::<u32>()) {
        let cache = Cache::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        let cache_clone = cache.clone();

        cache.set(key.clone(), first, opts().remove_callback(move |key, value, reason| {
            let visible = cache_clone.get(key).unwrap();
            *seen_clone.lock().unwrap() = Some((*value, reason, visible));
        })).unwrap();
        cache.set(key.clone(), second, opts()).unwrap();

        prop_assert_eq!(*seen.lock().unwrap(), Some((first, RemovalReason::Overwritten, Some(first))));
        prop_assert_eq!(cache.get(key).unwrap(), Some(second));
    }

    // clear_where removes exactly the matching entries and reports their count.
    #[test]
    fn prop_clear_where_partitions(entries in prop::collection::hash_map(key_strategy(), any::<u32>(), 0..30), modulus in 1u32..5) {
        let cache = Cache::new();
        for (key, value) in &entries {
            cache.set(key, *value, opts()).unwrap();
        }

        let removed = cache.clear_where(|_, value| value % modulus == 0);

        let expected_removed = entries.values().filter(|v| *v % modulus == 0).count();
        prop_assert_eq!(removed, expected_removed);
        prop_assert_eq!(cache.size(), entries.len() - expected_removed);
        for (key, value) in &entries {
            prop_assert_eq!(cache.has(key).unwrap(), value % modulus != 0);
        }
    }

    // Structured keys normalize identically regardless of field order.
    #[test]
    fn prop_structured_key_order_independent(fields in prop::collection::hash_map("[a-z]{1,6}", any::<i64>(), 1..8)) {
        let forward: Map<String, Value> = fields.iter().map(|(k, v)| (k.clone(), Value::from(*v))).collect();
        let mut pairs: Vec<(&String, &i64)> = fields.iter().collect();
        pairs.sort();
        pairs.reverse();
        let reverse: Map<String, Value> = pairs.into_iter().map(|(k, v)| (k.clone(), Value::from(*v))).collect();

        let a = normalize(&CacheKey::Structured(Value::Object(forward))).unwrap();
        let b = normalize(&CacheKey::Structured(Value::Object(reverse))).unwrap();
        prop_assert_eq!(&a.identifier, &b.identifier);

        let cache = Cache::new();
        cache.set(CacheKey::Structured(a.structured.clone().unwrap()), 1, opts()).unwrap();
        prop_assert_eq!(cache.get(CacheKey::Structured(b.structured.unwrap())).unwrap(), Some(1));
    }

    // Insertion order assigned at set time survives any number of reads.
    #[test]
    fn prop_reads_do_not_reorder(keys in prop::collection::hash_set(key_strategy(), 2..TEST_MAX_SIZE), reads in prop::collection::vec(any::<prop::sample::Index>(), 0..20)) {
        let keys: Vec<String> = keys.into_iter().collect();
        let cache = Cache::with_max_size(keys.len()).unwrap();
        for (i, key) in keys.iter().enumerate() {
            cache.set(key, i as u32, opts()).unwrap();
        }
        for index in reads {
            cache.get(index.get(&keys)).unwrap();
        }

        cache.set("zz-new", 0, opts()).unwrap();

        let mut expected: HashMap<&str, bool> = keys.iter().map(|k| (k.as_str(), true)).collect();
        expected.insert(keys[0].as_str(), false);
        for (key, present) in expected {
            prop_assert_eq!(cache.has(key).unwrap(), present);
        }
    }
}
