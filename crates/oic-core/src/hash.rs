/// Computes BLAKE3 and returns the 32-byte digest.
pub fn blake3_32(input: &[u8]) -> [u8; 32] {
    *blake3::hash(input).as_bytes()
}

/// Derives a stable device id from a seed such as a host name:
/// hex of the first 16 bytes of `H("oic-device" || seed)`.
pub fn derive_device_id(seed: &str) -> String {
    let mut buf = Vec::with_capacity(10 + seed.len());
    buf.extend_from_slice(b"oic-device");
    buf.extend_from_slice(seed.as_bytes());
    hex::encode(&blake3_32(&buf)[..16])
}

#[cfg(test)]
mod tests {
    use super::{blake3_32, derive_device_id};

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(blake3_32(b"oic"), blake3_32(b"oic"));
        assert_ne!(blake3_32(b"oic-a"), blake3_32(b"oic-b"));
    }

    #[test]
    fn device_id_is_hex_and_seed_dependent() {
        let id = derive_device_id("light-1");
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, derive_device_id("light-1"));
        assert_ne!(id, derive_device_id("light-2"));
    }
}
