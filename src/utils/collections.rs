//! Small constructors for the crate's standard map types.

use rustc_hash::FxHashMap;
use serde_json::Value;

/// New empty IO/value map with the crate's standard hasher.
#[must_use]
pub fn new_value_map() -> FxHashMap<String, Value> {
    FxHashMap::default()
}

/// Build a value map from an iterator of pairs.
pub fn value_map_from<I, K>(pairs: I) -> FxHashMap<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
