//! The platform's uniform `{code, message, data}` response wrapper.

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// Embedded codes that mean "slow down".
pub const RATE_LIMIT_CODES: &[i64] = &[-412, -352, -509, -799];

/// Embedded codes that mean the session credential was rejected.
pub const AUTH_CODES: &[i64] = &[-101, -111];

/// Generic envelope. `data` is kept loosely typed until the code is known.
#[derive(Debug, Deserialize)]
pub struct Envelope<T = serde_json::Value> {
    pub code: i64,
    #[serde(default, alias = "msg")]
    pub message: String,
    #[serde(default)]
    pub data: Option<T>,
}

/// What an envelope code means to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeClass {
    Success,
    RateLimited,
    Auth,
    Other,
}

pub fn classify(code: i64) -> CodeClass {
    match code {
        0 => CodeClass::Success,
        c if RATE_LIMIT_CODES.contains(&c) => CodeClass::RateLimited,
        c if AUTH_CODES.contains(&c) => CodeClass::Auth,
        _ => CodeClass::Other,
    }
}

impl Envelope<serde_json::Value> {
    /// Parse a raw body into an untyped envelope.
    pub fn from_body(body: &str) -> Result<Self, ApiError> {
        serde_json::from_str(body)
            .map_err(|e| ApiError::Malformed(format!("invalid envelope: {e}")))
    }

    #[inline]
    pub fn class(&self) -> CodeClass {
        classify(self.code)
    }

    /// Decode `data` into the payload type expected by the endpoint.
    ///
    /// A missing `data` is decoded from `null`, so `Option<_>` and `()`
    /// payloads work.
    pub fn decode_data<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        let data = self.data.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(data)
            .map_err(|e| ApiError::Malformed(format!("unexpected payload shape: {e}")))
    }

    /// Convert a non-zero code into the matching error.
    pub fn into_error(self, credential_id: Option<String>) -> ApiError {
        match self.class() {
            CodeClass::RateLimited => ApiError::RateLimited {
                code: self.code,
                message: self.message,
            },
            CodeClass::Auth => ApiError::Auth {
                code: self.code,
                message: self.message,
                credential_id,
            },
            CodeClass::Success | CodeClass::Other => ApiError::Api {
                code: self.code,
                message: self.message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Payload {
        mid: u64,
    }

    #[test]
    fn test_classify_codes() {
        assert_eq!(classify(0), CodeClass::Success);
        assert_eq!(classify(-412), CodeClass::RateLimited);
        assert_eq!(classify(-352), CodeClass::RateLimited);
        assert_eq!(classify(-101), CodeClass::Auth);
        assert_eq!(classify(-404), CodeClass::Other);
    }

    #[test]
    fn test_decode_data() {
        let env = Envelope::from_body(r#"{"code":0,"message":"0","data":{"mid":7}}"#).unwrap();
        assert_eq!(env.decode_data::<Payload>().unwrap(), Payload { mid: 7 });
    }

    #[test]
    fn test_decode_wrong_shape_is_malformed() {
        let env = Envelope::from_body(r#"{"code":0,"data":{"name":"x"}}"#).unwrap();
        assert!(env.decode_data::<Payload>().unwrap_err().is_malformed());
        assert!(Envelope::from_body("<html>").unwrap_err().is_malformed());
    }

    #[test]
    fn test_missing_data_decodes_as_null() {
        let env = Envelope::from_body(r#"{"code":0,"msg":"ok"}"#).unwrap();
        assert_eq!(env.message, "ok");
        assert_eq!(env.decode_data::<Option<Payload>>().unwrap(), None);
    }

    #[test]
    fn test_into_error_keeps_code_and_credential() {
        let env = Envelope::from_body(r#"{"code":-101,"message":"账号未登录"}"#).unwrap();
        match env.into_error(Some("main".into())) {
            ApiError::Auth {
                code,
                message,
                credential_id,
            } => {
                assert_eq!(code, -101);
                assert_eq!(message, "账号未登录");
                assert_eq!(credential_id.as_deref(), Some("main"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
