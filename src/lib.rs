//! A dictionary whose serialized form is a pair of parallel key/value
//! sequences plus a validity flag, for persistence hosts whose generic
//! serializers only handle linear fields. The load path detects duplicate
//! keys, keeps the first occurrence of each, and preserves the raw input for
//! inspection and repair instead of discarding it.

mod dict;
mod store;

pub use dict::{DictError, FlatDict};
pub use store::{StoreFormat, detect_format, from_slice, load_path, save_path, to_bytes};

/// String-keyed shorthand for the common case.
pub type StringDict<V> = FlatDict<String, V>;
