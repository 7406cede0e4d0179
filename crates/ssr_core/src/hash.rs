//! Short content hash used for ETags and fetch cache keys.

/// djb2-style hash (multiply by 33, xor) over the UTF-16 code units of each
/// value, walked back to front, rendered in base 36.
///
/// This matches the hash the client runtime computes for `data-hash`, so
/// both sides agree on the same key.
pub fn hash(values: &[&str]) -> String {
    let mut hash: i32 = 5381;
    for value in values {
        let units: Vec<u16> = value.encode_utf16().collect();
        for &unit in units.iter().rev() {
            hash = hash.wrapping_mul(33) ^ i32::from(unit);
        }
    }
    to_base36(hash as u32)
}

fn to_base36(mut n: u32) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
