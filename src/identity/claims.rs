use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

use crate::types::ClientError;

const ROLE_CLAIM_URI: &str = "http://schemas.microsoft.com/ws/2008/06/identity/claims/role";
const NAME_CLAIM_URI: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name";

/// Claims read from a bearer token. The signature is not verified here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenClaims {
    pub roles: Vec<String>,
    pub user_name: Option<String>,
}

impl TokenClaims {
    pub fn decode(token: &str) -> Result<Self, ClientError> {
        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| ClientError::Token("token has no payload segment".to_string()))?;
        // Some issuers pad the segment even though JWT forbids it.
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|err| ClientError::Token(format!("payload is not base64url: {err}")))?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|err| ClientError::Token(format!("payload is not JSON: {err}")))?;
        Ok(Self::from_value(&value))
    }

    fn from_value(value: &Value) -> Self {
        let roles = value
            .get("role")
            .or_else(|| value.get(ROLE_CLAIM_URI))
            .map(string_or_list)
            .unwrap_or_default();

        let user_name = ["name", NAME_CLAIM_URI, "sub"]
            .iter()
            .filter_map(|key| value.get(*key).and_then(|v| v.as_str()))
            .find(|name| !name.is_empty())
            .map(|name| name.to_string());

        Self { roles, user_name }
    }
}

fn string_or_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(single) => vec![single.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(|item| item.to_string())
            .collect(),
        _ => Vec::new(),
    }
}

/// Build an unsigned token around the given claims. Test helper.
#[cfg(test)]
pub(crate) fn unsigned_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.")
}
