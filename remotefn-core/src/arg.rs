//! Argument encoding: call argument -> URL-safe payload -> cache key.

use crate::codec::Codec;
use crate::error::RemoteError;
use crate::ids::{CacheKey, RemoteId};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;
use serde_json::Value;

/// Payload and key for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCall {
    pub payload: String,
    pub key: CacheKey,
}

/// Encode a call argument as a URL-safe payload.
///
/// `null` (and `()`, `None`) encode to the empty payload.
pub fn stringify_remote_arg<T: Serialize + ?Sized>(
    arg: &T,
    codec: &Codec,
) -> Result<String, RemoteError> {
    let value = serde_json::to_value(arg)
        .map_err(|e| RemoteError::encoding(format!("Unsupported argument: {}", e)))?;
    if value.is_null() {
        return Ok(String::new());
    }
    let text = codec.stringify_value(&value)?;
    Ok(URL_SAFE_NO_PAD.encode(text.as_bytes()))
}

/// Inverse of [`stringify_remote_arg`]
pub fn parse_remote_arg(payload: &str, codec: &Codec) -> Result<Value, RemoteError> {
    if payload.is_empty() {
        return Ok(Value::Null);
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| RemoteError::encoding(format!("Invalid payload: {}", e)))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| RemoteError::encoding(format!("Invalid payload: {}", e)))?;
    codec.parse(&text)
}

pub fn create_remote_cache_key(id: &RemoteId, payload: &str) -> CacheKey {
    CacheKey::new(format!("{}/{}", id, payload))
}

/// Encode `arg` for the remote function `id`
pub fn encode<T: Serialize + ?Sized>(
    id: &RemoteId,
    arg: &T,
    codec: &Codec,
) -> Result<EncodedCall, RemoteError> {
    let payload = stringify_remote_arg(arg, codec)?;
    let key = create_remote_cache_key(id, &payload);
    Ok(EncodedCall { payload, key })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_unit_argument_is_empty() {
        let call = encode(&RemoteId::new("now"), &(), &Codec::new()).unwrap();
        assert_eq!(call.payload, "");
        assert_eq!(call.key.as_str(), "now/");
    }

    #[test]
    fn test_payload_is_url_safe() {
        let call = encode(
            &RemoteId::new("search"),
            &json!({"q": "???>>>", "page": 1}),
            &Codec::new(),
        )
        .unwrap();
        assert!(!call.payload.contains('+'));
        assert!(!call.payload.contains('/'));
        assert!(!call.payload.contains('='));
        assert_eq!(
            parse_remote_arg(&call.payload, &Codec::new()).unwrap(),
            json!({"q": "???>>>", "page": 1})
        );
    }

    #[test]
    fn test_field_order_does_not_change_key() {
        let mut a = HashMap::new();
        a.insert("id", 1);
        a.insert("rev", 2);
        let id = RemoteId::new("getUser");
        let first = encode(&id, &a, &Codec::new()).unwrap();
        let second = encode(&id, &json!({"rev": 2, "id": 1}), &Codec::new()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_encoding_failure_propagates() {
        let mut bad = std::collections::BTreeMap::new();
        bad.insert(vec![1u8], 1);
        let err = encode(&RemoteId::new("x"), &bad, &Codec::new()).unwrap_err();
        assert!(matches!(err, RemoteError::Encoding(_)));
    }

    proptest! {
        #[test]
        fn prop_same_argument_same_key(id in "[a-z]{1,8}", n in any::<i64>(), s in ".{0,16}") {
            let id = RemoteId::new(id);
            let arg = json!({"n": n, "s": s});
            let first = encode(&id, &arg, &Codec::new()).unwrap();
            let second = encode(&id, &arg.clone(), &Codec::new()).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_distinct_arguments_distinct_keys(a in any::<i64>(), b in any::<i64>()) {
            prop_assume!(a != b);
            let id = RemoteId::new("f");
            let first = encode(&id, &a, &Codec::new()).unwrap();
            let second = encode(&id, &b, &Codec::new()).unwrap();
            prop_assert_ne!(first.key, second.key);
        }
    }
}
