//! Conversion between sessions and stored bytes.

use crate::error::{StoreError, StoreResult};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encodes sessions for storage and decodes them back.
///
/// Failures are reported as [`StoreError::Encode`] and [`StoreError::Decode`].
pub trait SessionSerializer<S>: Send + Sync {
    /// Encode a session.
    fn encode(&self, session: &S) -> StoreResult<Vec<u8>>;

    /// Decode stored bytes.
    fn decode(&self, bytes: &[u8]) -> StoreResult<S>;
}

/// JSON serializer, the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<S: Serialize + DeserializeOwned> SessionSerializer<S> for JsonSerializer {
    fn encode(&self, session: &S) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(session).map_err(|e| StoreError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> StoreResult<S> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Session;
    use std::collections::HashMap;

    #[test]
    fn test_json_round_trip() {
        let mut session = Session::default();
        session.set("bar", "baz").unwrap();

        let bytes = JsonSerializer.encode(&session).unwrap();
        let decoded: Session = JsonSerializer.decode(&bytes).unwrap();
        assert_eq!(decoded, session);
    }

    #[test]
    fn test_malformed_bytes_fail_to_decode() {
        let result: StoreResult<Session> = JsonSerializer.decode(b"{\"bar\":");
        assert!(matches!(result, Err(StoreError::Decode(_))));

        let result: StoreResult<Session> = JsonSerializer.decode(&[0xff, 0xfe, 0x00]);
        assert!(matches!(result, Err(StoreError::Decode(_))));
    }

    #[test]
    fn test_unrepresentable_value_fails_to_encode() {
        // JSON object keys must be strings
        let mut unrepresentable = HashMap::new();
        unrepresentable.insert(vec![1u8, 2], "value".to_string());

        let result = JsonSerializer.encode(&unrepresentable);
        assert!(matches!(result, Err(StoreError::Encode(_))));
    }
}
