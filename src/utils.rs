pub fn new_fast_hashmap<K, V>(cap: usize) -> ahash::HashMap<K, V> {
    ahash::HashMap::with_capacity_and_hasher(cap, ahash::RandomState::default())
}

const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Opaque short id generator shared by room ids, session ids and request ids.
/// Collision probability is negligible for the lengths used across a fleet.
pub fn generate_id(len: usize) -> String {
    let mut rng = fastrand::Rng::new();
    let mut out = String::with_capacity(len);
    for _ in 0..len {
        let idx = rng.usize(0..ID_CHARSET.len());
        out.push(ID_CHARSET[idx] as char);
    }
    out
}
