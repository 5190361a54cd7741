use serde::Serialize;
use zeroize::Zeroizing;

use crate::error::Result;

/// Text form used before hashing or encrypting a value: strings as-is,
/// everything else as compact JSON in field/insertion order.
pub fn canonical_text<T: Serialize + ?Sized>(value: &T) -> Result<Zeroizing<String>> {
    Ok(Zeroizing::new(match serde_json::to_value(value)? {
        serde_json::Value::String(s) => s,
        other => serde_json::to_string(&other)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strings_pass_through() {
        assert_eq!(&*canonical_text("abc").unwrap(), "abc");
    }

    #[test]
    fn objects_keep_insertion_order() {
        let value: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":[true,null]}"#).unwrap();
        assert_eq!(&*canonical_text(&value).unwrap(), r#"{"b":1,"a":[true,null]}"#);
    }
}
