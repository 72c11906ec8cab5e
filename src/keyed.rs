//! Stand keys in the JSON artifacts.
//!
//! The tree log writes stand identifiers as decimals, and downstream consumers look stands
//! up by the float rendering (`"1234.0"`). Keys are kept as `f64` in memory and only
//! turned into text at the serialization boundary.

use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use std::{fmt, marker::PhantomData};

/// Render a stand id the way the optimizer expects it: whole numbers keep one decimal.
pub fn format_stand_key(stand: f64) -> String {
    if stand.fract() == 0.0 && stand.abs() < 1e15 {
        format!("{:.1}", stand)
    } else {
        format!("{}", stand)
    }
}

pub fn parse_stand_key(key: &str) -> Option<f64> {
    key.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Bit pattern used to index stands by id; folds `-0.0` into `0.0`.
pub fn stand_bits(stand: f64) -> u64 {
    if stand == 0.0 {
        0.0f64.to_bits()
    } else {
        stand.to_bits()
    }
}

/// A JSON object read back as its entries in document order.
#[derive(Debug)]
pub struct OrderedEntries<V>(pub Vec<(String, V)>);

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedEntries<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for EntriesVisitor<V> {
            type Value = OrderedEntries<V>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((k, v)) = map.next_entry::<String, V>()? {
                    entries.push((k, v));
                }
                Ok(OrderedEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_ids_keep_one_decimal() {
        assert_eq!(format_stand_key(1234.0), "1234.0");
        assert_eq!(format_stand_key(0.0), "0.0");
        assert_eq!(format_stand_key(12.5), "12.5");
    }

    #[test]
    fn keys_parse_back() {
        assert_eq!(parse_stand_key("1234.0"), Some(1234.0));
        assert_eq!(parse_stand_key("17"), Some(17.0));
        assert_eq!(parse_stand_key("NaN"), None);
        assert_eq!(parse_stand_key("abc"), None);
    }

    #[test]
    fn negative_zero_shares_a_slot() {
        assert_eq!(stand_bits(-0.0), stand_bits(0.0));
    }

    #[test]
    fn entries_keep_document_order() -> anyhow::Result<()> {
        let OrderedEntries(entries): OrderedEntries<u32> =
            serde_json::from_str(r#"{"b": 1, "a": 2, "c": 3}"#)?;
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["b", "a", "c"]);
        Ok(())
    }
}
