//! Two deliberately distinct identifier generators (spec §4.2, §9): the
//! message id the wrapper stamps on every message it processes, and the
//! event id the feeder mints for every outbound ingest event. They share
//! no representation on purpose — a message id is a hex string sized for
//! embedding in a header and a URL; an event id is a decimal string sized
//! to fit the remote ingest API's signed-63-bit field.

use data_encoding::HEXLOWER;
use rand::RngCore;

/// Generates a 20-character lowercase hex message id from 10 random
/// bytes. No coordination with any other process is required or
/// possible: uniqueness rests entirely on the birthday bound of a
/// 80-bit random value.
pub fn new_message_id() -> String {
    let mut bytes = [0u8; 10];
    rand::thread_rng().fill_bytes(&mut bytes);
    HEXLOWER.encode(&bytes)
}

/// Generates a decimal string representation of a fresh random integer
/// in `[0, 2^63)`: 8 random bytes with the top bit cleared, interpreted
/// as a big-endian u64.
pub fn new_event_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[0] &= 0x7f;
    let value = u64::from_be_bytes(bytes);
    value.to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn message_id_is_20_lowercase_hex_chars() {
        for _ in 0..100 {
            let id = new_message_id();
            assert_eq!(id.len(), 20);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn message_ids_are_distinct() {
        let a = new_message_id();
        let b = new_message_id();
        assert_ne!(a, b);
    }

    #[test]
    fn event_id_is_non_negative_and_fits_63_bits() {
        for _ in 0..100 {
            let id = new_event_id();
            let value: u64 = id.parse().expect("event id must be decimal");
            assert!(value < (1u64 << 63));
        }
    }
}
