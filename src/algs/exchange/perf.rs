// Iteration order of these aliases is **not** relied upon for determinism;
// they only back membership checks.

#[cfg(feature = "fast-hash")]
pub type FastMap<K, V> = ahash::AHashMap<K, V>;

#[cfg(not(feature = "fast-hash"))]
pub type FastMap<K, V> = hashbrown::HashMap<K, V>;
