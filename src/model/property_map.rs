//! PropertyMap: the key-value store on vertices.

use std::collections::BTreeMap;
use super::Value;

/// A map of property names to values. Ordered so snapshots serialize
/// deterministically.
pub type PropertyMap = BTreeMap<String, Value>;

/// Convert a list of (key, value) pairs into a PropertyMap.
pub fn properties<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> PropertyMap
where
    K: Into<String>,
    V: Into<Value>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
