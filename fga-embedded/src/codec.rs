//! JSON wire mapping of the engine's typed requests and responses.
//!
//! Payloads use the objects' own lowerCamelCase field names. Decoding accepts
//! snake_case spellings, ignores unknown fields and fills missing fields with
//! their zero value.

use crate::error::{FacadeError, FacadeResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

pub fn decode<T: DeserializeOwned>(operation: &'static str, payload: &[u8]) -> FacadeResult<T> {
    serde_json::from_slice(payload).map_err(|source| {
        debug!("Rejected {} payload: {}", operation, source);
        FacadeError::Decode { operation, source }
    })
}

pub fn encode<T: Serialize>(operation: &'static str, response: &T) -> FacadeResult<Vec<u8>> {
    serde_json::to_vec(response).map_err(|source| FacadeError::Encode { operation, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fga_engine::{CheckRequest, TupleKey, Userset, WriteAuthorizationModelRequest};
    use proptest::prelude::*;

    const CHECK: &str = r#"{"storeId":"01HV","tupleKey":{"object":"doc:1","relation":"viewer","user":"user:anne"}}"#;

    #[test]
    fn test_malformed_payload() {
        let result: FacadeResult<CheckRequest> = decode("check", b"{not json");
        assert!(matches!(
            result,
            Err(FacadeError::Decode {
                operation: "check",
                ..
            })
        ));
    }

    #[test]
    fn test_missing_fields_take_zero_values() {
        let request: CheckRequest = decode("check", br#"{"storeId":"01HV"}"#).unwrap();
        assert_eq!(request.store_id, "01HV");
        assert_eq!(request.tuple_key, TupleKey::default());
        assert!(request.contextual_tuples.is_none());
    }

    #[test]
    fn test_encode_uses_camel_case() {
        let request: CheckRequest = decode("check", CHECK.as_bytes()).unwrap();
        let encoded = String::from_utf8(encode("check", &request).unwrap()).unwrap();
        assert!(encoded.contains("\"storeId\":\"01HV\""));
        assert!(encoded.contains("\"tupleKey\""));
    }

    #[test]
    fn test_nested_unknown_keys_are_ignored() {
        let payload = br#"{"storeId":"01HV","schemaVersion":"1.1","typeDefinitions":[{"type":"user"},{"type":"doc","relations":{"viewer":{"this":{},"metadata":{}}},"extra":1}]}"#;
        let request: WriteAuthorizationModelRequest =
            decode("write_authorization_model", payload).unwrap();
        assert_eq!(request.type_definitions[1].relations["viewer"], Userset::this());
    }

    proptest! {
        #[test]
        fn test_unknown_fields_are_ignored(
            field in "x[a-zA-Z0-9_]{0,16}",
            value in any::<i64>(),
        ) {
            let mut payload: serde_json::Value = serde_json::from_str(CHECK).unwrap();
            payload[&field] = serde_json::json!(value);
            let with_extra = serde_json::to_vec(&payload).unwrap();

            let expected: CheckRequest = decode("check", CHECK.as_bytes()).unwrap();
            let decoded: CheckRequest = decode("check", &with_extra).unwrap();
            prop_assert_eq!(decoded, expected);
        }
    }
}
