//! Order and image identifiers.
//!
//! Format: prefix + millisecond timestamp + 8 hex chars of a v4 UUID, e.g.
//! `ORD20240314093000123a1b2c3d4`. The random tail keeps ids issued in the
//! same millisecond apart.

use chrono::NaiveDateTime;
use uuid::Uuid;

pub const ORDER_PREFIX: &str = "ORD";
pub const IMAGE_PREFIX: &str = "IMG";

const STAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";
const STAMP_LEN: usize = 17;
const SUFFIX_LEN: usize = 8;

pub fn new_order_id(now: NaiveDateTime) -> String {
    generate(ORDER_PREFIX, now)
}

pub fn new_image_id(now: NaiveDateTime) -> String {
    generate(IMAGE_PREFIX, now)
}

fn generate(prefix: &str, now: NaiveDateTime) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}{}{}", prefix, now.format(STAMP_FORMAT), &random[..SUFFIX_LEN])
}

/// Whether `candidate` has the shape of an id from [`new_order_id`]
pub fn is_order_id(candidate: &str) -> bool {
    let Some(rest) = candidate.strip_prefix(ORDER_PREFIX) else {
        return false;
    };
    // Bytes, not str slices: names come from the external system
    let bytes = rest.as_bytes();
    bytes.len() == STAMP_LEN + SUFFIX_LEN
        && bytes[..STAMP_LEN].iter().all(u8::is_ascii_digit)
        && bytes[STAMP_LEN..].iter().all(u8::is_ascii_hexdigit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::HashSet;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 14)
            .unwrap()
            .and_hms_milli_opt(9, 30, 0, 123)
            .unwrap()
    }

    #[test]
    fn test_order_id_shape() {
        let id = new_order_id(now());
        assert!(id.starts_with("ORD20240314093000123"));
        assert_eq!(id.len(), 3 + 17 + 8);
        assert!(is_order_id(&id));
    }

    #[test]
    fn test_ids_unique_within_same_millisecond() {
        let ids: HashSet<_> = (0..1000).map(|_| new_order_id(now())).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_is_order_id_rejects_foreign_names() {
        assert!(!is_order_id("O123"));
        assert!(!is_order_id("readme"));
        assert!(!is_order_id(&new_image_id(now())));
        assert!(!is_order_id("ORD2024031409300012Xa1b2c3d4"));
    }

    #[test]
    fn test_is_order_id_handles_non_ascii_names() {
        // Multibyte char straddling the stamp/suffix boundary
        let straddling = format!("ORD{}é{}", "0".repeat(16), "abcdef1");
        assert!(!is_order_id(&straddling));
        assert!(!is_order_id("ORDüberweisung-röntgen"));
        assert!(!is_order_id("ORD"));
    }
}
