use indexmap::{Equivalent, IndexMap};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de, ser::SerializeStruct};
use std::hash::Hash;
use thiserror::Error;

/// Errors surfaced by the [`FlatDict`] facade and load path.
///
/// Duplicate keys observed while loading are deliberately absent here: that is a
/// recoverable data-quality condition reported through [`FlatDict::is_invalid`],
/// not through the error channel.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DictError {
    #[error("key not found")]
    KeyNotFound,
    #[error("key already present")]
    DuplicateKey,
    #[error("invalid serialized data: {keys} key(s) while {values} value(s)")]
    MalformedInput { keys: usize, values: usize },
}

/// A dictionary whose serialized form is a pair of parallel `keys`/`values`
/// sequences plus an `invalid` flag, for hosts whose serializers only handle
/// linear fields.
///
/// At runtime the backing [`IndexMap`] is the sole authority; the buffers are a
/// transient wire form filled by [`before_serialize`](Self::before_serialize)
/// and consumed by [`after_deserialize`](Self::after_deserialize). Insertion
/// order is the native iteration order, so serializing an unchanged dictionary
/// twice produces identical buffers.
///
/// When a load observes duplicate keys, the first occurrence of each key wins,
/// `invalid` is raised, and the raw buffers are preserved untouched so an
/// external editor can inspect and fix the data before the next save.
#[derive(Debug, Clone)]
pub struct FlatDict<K, V> {
    entries: IndexMap<K, V>,
    keys: Vec<K>,
    values: Vec<V>,
    invalid: bool,
}

impl<K: Hash + Eq, V: PartialEq> PartialEq for FlatDict<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
            && self.keys == other.keys
            && self.values == other.values
            && self.invalid == other.invalid
    }
}

impl<K, V> FlatDict<K, V> {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
            keys: Vec::new(),
            values: Vec::new(),
            invalid: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when the most recent load observed at least one duplicate key.
    pub fn is_invalid(&self) -> bool {
        self.invalid
    }

    /// The raw key buffer. Only meaningful between a save-side flatten and the
    /// next load, or after a load that raised `invalid`.
    pub fn raw_keys(&self) -> &[K] {
        &self.keys
    }

    /// The raw value buffer; `raw_values()[i]` pairs with `raw_keys()[i]`.
    pub fn raw_values(&self) -> &[V] {
        &self.values
    }

    /// Positional access to both buffers for an external editor
    /// (insert/delete/move/overwrite at index). The dictionary tolerates any
    /// edit here; call [`after_deserialize`](Self::after_deserialize) to adopt
    /// the edited buffers as the new entries.
    pub fn raw_parts_mut(&mut self) -> (&mut Vec<K>, &mut Vec<V>) {
        (&mut self.keys, &mut self.values)
    }

    /// Drops the `invalid` flag without touching entries or buffers.
    ///
    /// For application code that resolves a bad load by clearing and
    /// repopulating the entries itself: once the flag is down, the next
    /// [`before_serialize`](Self::before_serialize) regenerates clean buffers.
    pub fn clear_invalid(&mut self) {
        self.invalid = false;
    }

    /// Lazy `(key, value)` pairs in native (insertion) order. A fresh call
    /// reflects the current entries.
    pub fn iter(&self) -> indexmap::map::Iter<'_, K, V> {
        self.entries.iter()
    }

    pub fn keys(&self) -> indexmap::map::Keys<'_, K, V> {
        self.entries.keys()
    }

    pub fn values(&self) -> indexmap::map::Values<'_, K, V> {
        self.entries.values()
    }
}

impl<K: Hash + Eq, V> FlatDict<K, V> {
    /// Checked lookup; errors with [`DictError::KeyNotFound`] on absence.
    pub fn get<Q>(&self, key: &Q) -> Result<&V, DictError>
    where
        Q: ?Sized + Hash + Equivalent<K>,
    {
        self.entries.get(key).ok_or(DictError::KeyNotFound)
    }

    /// Lookup that never fails.
    pub fn try_get<Q>(&self, key: &Q) -> Option<&V>
    where
        Q: ?Sized + Hash + Equivalent<K>,
    {
        self.entries.get(key)
    }

    pub fn try_get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        Q: ?Sized + Hash + Equivalent<K>,
    {
        self.entries.get_mut(key)
    }

    /// Upsert: inserts if absent, overwrites if present. Returns the replaced
    /// value, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    /// Strict insert; errors with [`DictError::DuplicateKey`] if the key is
    /// already present, leaving the existing entry untouched.
    pub fn add(&mut self, key: K, value: V) -> Result<(), DictError> {
        if self.entries.contains_key(&key) {
            return Err(DictError::DuplicateKey);
        }
        self.entries.insert(key, value);
        Ok(())
    }

    /// Removes an entry, preserving the order of the remaining entries.
    /// Returns the removed value, if any.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        Q: ?Sized + Hash + Equivalent<K>,
    {
        self.entries.shift_remove(key)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        Q: ?Sized + Hash + Equivalent<K>,
    {
        self.entries.contains_key(key)
    }

    /// Empties the entries. The raw buffers are a separate wire form and are
    /// not touched.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<K: Hash + Eq + Clone, V: Clone> FlatDict<K, V> {
    /// Save-side flatten: rebuilds the raw buffers from the entries.
    ///
    /// While `invalid` is raised this is a no-op, so the faulty raw data a
    /// previous load captured is not silently discarded before someone fixes
    /// it. Never mutates the entries or the flag.
    pub fn before_serialize(&mut self) {
        if self.invalid {
            return;
        }

        self.keys.clear();
        self.values.clear();
        for (key, value) in &self.entries {
            self.keys.push(key.clone());
            self.values.push(value.clone());
        }
    }

    /// Load-side rebuild: adopts the raw buffers as the new entries.
    ///
    /// Duplicate keys keep their first occurrence, raise `invalid`, and leave
    /// both buffers exactly as received so the original data can be inspected
    /// and repaired. A clean rebuild empties the buffers; the entries are then
    /// the sole authority again.
    ///
    /// A length mismatch between the buffers is reported as
    /// [`DictError::MalformedInput`]: the entries end up empty, the buffers
    /// stay untouched, and `invalid` stays `false` (the mismatch and the
    /// duplicate-key condition are distinct and reported on distinct channels).
    /// The caller decides whether to log or escalate.
    pub fn after_deserialize(&mut self) -> Result<(), DictError> {
        self.entries.clear();
        self.invalid = false;

        if self.keys.len() != self.values.len() {
            return Err(DictError::MalformedInput {
                keys: self.keys.len(),
                values: self.values.len(),
            });
        }

        for (key, value) in self.keys.iter().zip(self.values.iter()) {
            if self.entries.contains_key(key) {
                self.invalid = true;
            } else {
                self.entries.insert(key.clone(), value.clone());
            }
        }

        if !self.invalid {
            self.keys.clear();
            self.values.clear();
        }
        Ok(())
    }
}

impl<K, V> Default for FlatDict<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq, V> From<IndexMap<K, V>> for FlatDict<K, V> {
    fn from(entries: IndexMap<K, V>) -> Self {
        Self {
            entries,
            keys: Vec::new(),
            values: Vec::new(),
            invalid: false,
        }
    }
}

impl<K: Hash + Eq, V> FromIterator<(K, V)> for FlatDict<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from(IndexMap::from_iter(iter))
    }
}

impl<K: Hash + Eq, V> Extend<(K, V)> for FlatDict<K, V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}

impl<'a, K, V> IntoIterator for &'a FlatDict<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = indexmap::map::Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<K, V> IntoIterator for FlatDict<K, V> {
    type Item = (K, V);
    type IntoIter = indexmap::map::IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

// Wire form: a plain three-field struct so a generic serializer only ever sees
// two linear sequences and a bool.

impl<K, V> Serialize for FlatDict<K, V>
where
    K: Serialize + Hash + Eq,
    V: Serialize,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Non-mutating equivalent of before_serialize: a clean dictionary
        // flattens its entries, an invalid one re-emits the preserved buffers.
        struct EntryKeys<'a, K, V>(&'a IndexMap<K, V>);
        struct EntryValues<'a, K, V>(&'a IndexMap<K, V>);

        impl<K: Serialize, V> Serialize for EntryKeys<'_, K, V> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_seq(self.0.keys())
            }
        }

        impl<K, V: Serialize> Serialize for EntryValues<'_, K, V> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_seq(self.0.values())
            }
        }

        let mut state = serializer.serialize_struct("FlatDict", 3)?;
        if self.invalid {
            state.serialize_field("keys", &self.keys)?;
            state.serialize_field("values", &self.values)?;
        } else {
            state.serialize_field("keys", &EntryKeys(&self.entries))?;
            state.serialize_field("values", &EntryValues(&self.entries))?;
        }
        state.serialize_field("invalid", &self.invalid)?;
        state.end()
    }
}

impl<'de, K, V> Deserialize<'de> for FlatDict<K, V>
where
    K: Deserialize<'de> + Hash + Eq + Clone,
    V: Deserialize<'de> + Clone,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(bound(deserialize = "K: Deserialize<'de>, V: Deserialize<'de>"))]
        struct RawDict<K, V> {
            #[serde(default)]
            keys: Vec<K>,
            #[serde(default)]
            values: Vec<V>,
            #[serde(default)]
            invalid: bool,
        }

        // The persisted flag is recomputed by the load scan, as the rebuild is
        // what decides validity.
        let RawDict {
            keys,
            values,
            invalid: _,
        } = RawDict::deserialize(deserializer)?;

        let mut dict = Self {
            entries: IndexMap::new(),
            keys,
            values,
            invalid: false,
        };
        dict.after_deserialize().map_err(de::Error::custom)?;
        Ok(dict)
    }
}

#[cfg(test)]
mod tests {
    use super::{DictError, FlatDict};

    fn dict_with_buffers(keys: Vec<&str>, values: Vec<i32>) -> FlatDict<String, i32> {
        let mut dict = FlatDict::new();
        let (raw_keys, raw_values) = dict.raw_parts_mut();
        raw_keys.extend(keys.into_iter().map(str::to_string));
        raw_values.extend(values);
        dict
    }

    #[test]
    fn add_rejects_present_key_and_keeps_existing_entry() {
        let mut dict = FlatDict::new();
        dict.add("a".to_string(), 1).unwrap();
        assert_eq!(dict.add("a".to_string(), 2), Err(DictError::DuplicateKey));
        assert_eq!(dict.try_get("a"), Some(&1));
    }

    #[test]
    fn insert_upserts() {
        let mut dict = FlatDict::new();
        assert_eq!(dict.insert("a".to_string(), 1), None);
        assert_eq!(dict.insert("a".to_string(), 2), Some(1));
        assert_eq!(dict.try_get("a"), Some(&2));
    }

    #[test]
    fn get_reports_key_not_found() {
        let dict: FlatDict<String, i32> = FlatDict::new();
        assert_eq!(dict.get("missing"), Err(DictError::KeyNotFound));
        assert_eq!(dict.try_get("missing"), None);
    }

    #[test]
    fn remove_returns_removed_value() {
        let mut dict: FlatDict<String, i32> = [("a".to_string(), 1)].into_iter().collect();
        assert_eq!(dict.remove("a"), Some(1));
        assert_eq!(dict.remove("a"), None);
        assert!(dict.is_empty());
    }

    #[test]
    fn clear_empties_entries_but_not_buffers() {
        let mut dict: FlatDict<String, i32> = [("a".to_string(), 1)].into_iter().collect();
        dict.before_serialize();
        dict.clear();
        assert_eq!(dict.len(), 0);
        assert_eq!(dict.raw_keys(), ["a".to_string()]);
        assert_eq!(dict.raw_values(), [1]);
    }

    #[test]
    fn iteration_follows_insertion_order() {
        let mut dict = FlatDict::new();
        dict.insert("b".to_string(), 2);
        dict.insert("a".to_string(), 1);
        dict.insert("c".to_string(), 3);
        let pairs: Vec<(&String, &i32)> = dict.iter().collect();
        assert_eq!(
            pairs,
            vec![
                (&"b".to_string(), &2),
                (&"a".to_string(), &1),
                (&"c".to_string(), &3),
            ]
        );
    }

    #[test]
    fn before_serialize_flattens_in_insertion_order() {
        let mut dict = FlatDict::new();
        dict.insert("b".to_string(), 2);
        dict.insert("a".to_string(), 1);
        dict.before_serialize();
        assert_eq!(dict.raw_keys(), ["b".to_string(), "a".to_string()]);
        assert_eq!(dict.raw_values(), [2, 1]);
    }

    #[test]
    fn after_deserialize_adopts_clean_buffers_and_empties_them() {
        let mut dict = dict_with_buffers(vec!["a", "b"], vec![1, 2]);
        dict.after_deserialize().unwrap();
        assert!(!dict.is_invalid());
        assert_eq!(dict.try_get("a"), Some(&1));
        assert_eq!(dict.try_get("b"), Some(&2));
        assert!(dict.raw_keys().is_empty());
        assert!(dict.raw_values().is_empty());
    }

    #[test]
    fn after_deserialize_keeps_first_occurrence_and_preserves_buffers() {
        let mut dict = dict_with_buffers(vec!["a", "b", "a"], vec![1, 2, 3]);
        dict.after_deserialize().unwrap();
        assert!(dict.is_invalid());
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.try_get("a"), Some(&1));
        assert_eq!(dict.try_get("b"), Some(&2));
        // Raw input survives verbatim, duplicates included.
        assert_eq!(
            dict.raw_keys(),
            ["a".to_string(), "b".to_string(), "a".to_string()]
        );
        assert_eq!(dict.raw_values(), [1, 2, 3]);
    }

    #[test]
    fn after_deserialize_length_mismatch_is_malformed_input() {
        let mut dict = dict_with_buffers(vec!["a", "b"], vec![1]);
        assert_eq!(
            dict.after_deserialize(),
            Err(DictError::MalformedInput { keys: 2, values: 1 })
        );
        assert!(dict.is_empty());
        assert!(!dict.is_invalid());
        // Buffers stay untouched for inspection.
        assert_eq!(dict.raw_keys(), ["a".to_string(), "b".to_string()]);
        assert_eq!(dict.raw_values(), [1]);
    }

    #[test]
    fn before_serialize_is_a_noop_while_invalid() {
        let mut dict = dict_with_buffers(vec!["a", "a"], vec![1, 2]);
        dict.after_deserialize().unwrap();
        assert!(dict.is_invalid());

        // Even after further entry mutation, the captured raw data wins.
        dict.insert("z".to_string(), 99);
        dict.before_serialize();
        assert_eq!(dict.raw_keys(), ["a".to_string(), "a".to_string()]);
        assert_eq!(dict.raw_values(), [1, 2]);
        assert!(dict.is_invalid());
    }

    #[test]
    fn clear_invalid_lets_serialize_regenerate_buffers() {
        let mut dict = dict_with_buffers(vec!["a", "a"], vec![1, 2]);
        dict.after_deserialize().unwrap();
        assert!(dict.is_invalid());

        // Application-side repair: rebuild the entries, drop the flag.
        dict.clear();
        dict.insert("a".to_string(), 1);
        dict.clear_invalid();
        dict.before_serialize();
        assert_eq!(dict.raw_keys(), ["a".to_string()]);
        assert_eq!(dict.raw_values(), [1]);
    }

    #[test]
    fn buffer_edit_then_reload_repairs_invalid_state() {
        let mut dict = dict_with_buffers(vec!["a", "b", "a"], vec![1, 2, 3]);
        dict.after_deserialize().unwrap();
        assert!(dict.is_invalid());

        // Editor-side repair: rename the duplicate in place, reload.
        let (raw_keys, _) = dict.raw_parts_mut();
        raw_keys[2] = "c".to_string();
        dict.after_deserialize().unwrap();

        assert!(!dict.is_invalid());
        assert_eq!(dict.len(), 3);
        assert_eq!(dict.try_get("c"), Some(&3));
        assert!(dict.raw_keys().is_empty());
    }
}
