//! Kademlia distance calculations.

use crate::domain::{Distance, KadId};

/// XOR distance between two distance keys.
///
/// # Properties
/// - Symmetric: `xor_distance(a, b) == xor_distance(b, a)`
/// - Identity: `xor_distance(a, a)` is zero
/// - Unidirectional: for a fixed `a`, every distance has exactly one `b`
pub fn xor_distance(a: &KadId, b: &KadId) -> Distance {
    let mut out = [0u8; 32];
    for (o, (x, y)) in out.iter_mut().zip(a.as_bytes().iter().zip(b.as_bytes())) {
        *o = x ^ y;
    }
    Distance(out)
}

/// Bucket index for a remote peer relative to the local distance key.
///
/// `None` only when both keys are equal, which for SHA-256 derived keys
/// means the remote is the local identity.
pub fn bucket_index(local: &KadId, remote: &KadId) -> Option<usize> {
    xor_distance(local, remote).bucket_index()
}
