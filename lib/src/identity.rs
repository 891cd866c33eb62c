use num_bigint::BigUint;
use num_traits::ToPrimitive;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;

/// Number of identifier bits the harness uses when naming ring members.
pub const RING_BITS: u32 = 6;

/// Size of the harness identifier space, `2^RING_BITS`.
pub const RING_SIZE: u64 = 1 << RING_BITS;

/// Position of a node in the ring's address space.
pub type RingId = u64;

/// Formats the endpoint string that identifiers are derived from.
pub fn endpoint(host: &str, port: u16) -> String {
    format!("{}:{}", host, port)
}

/// SHA-1 digest of an endpoint, hex encoded. Handy when correlating with
/// node output that prints full identifiers.
pub fn endpoint_digest_hex(endpoint: &str) -> String {
    hex::encode(digest(endpoint))
}

/// Maps an endpoint to its identifier in `[0, RING_SIZE)`.
pub fn assign(endpoint: &str) -> RingId {
    assign_in(endpoint, RING_SIZE)
}

/// Maps an endpoint into `[0, modulus)` by reducing its SHA-1 digest, read
/// as a big-endian integer.
///
/// A modulus of zero is treated as one, so the result is always `0`.
pub fn assign_in(endpoint: &str, modulus: u64) -> RingId {
    let value = BigUint::from_bytes_be(&digest(endpoint));
    let reduced = value % BigUint::from(modulus.max(1));
    // The remainder is strictly below a u64 modulus.
    reduced.to_u64().unwrap_or_default()
}

/// Groups names that share an identifier. Only groups with more than one
/// member are returned.
pub fn find_collisions<'a, I>(members: I) -> Vec<(RingId, Vec<String>)>
where
    I: IntoIterator<Item = (&'a str, RingId)>,
{
    let mut by_id: BTreeMap<RingId, Vec<String>> = BTreeMap::new();
    for (name, id) in members {
        by_id.entry(id).or_default().push(name.to_string());
    }
    by_id
        .into_iter()
        .filter(|(_, names)| names.len() > 1)
        .collect()
}

fn digest(endpoint: &str) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(endpoint.as_bytes());
    hasher.finalize().into()
}
