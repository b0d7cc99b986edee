use fxhash::FxBuildHasher;

/// Hash map used throughout the crate.
/// Keys are short strings and small identifiers, for which Fx hashing is considerably faster
/// than SipHash.
pub type Map<K, V> = hashbrown::HashMap<K, V, FxBuildHasher>;

pub type Set<T> = hashbrown::HashSet<T, FxBuildHasher>;
