//! Request arguments and cache fingerprints.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{DataType, ValidationError};

/// Canonical key/value arguments handed to every adapter in a chain.
///
/// Keys are kept sorted and `null` values are dropped, so two requests that
/// differ only in argument order or in explicitly-absent optionals produce
/// the same [`Fingerprint`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FetchArgs(BTreeMap<String, Value>);

impl FetchArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds arguments from a request struct that serializes to a JSON object.
    pub fn from_request<R: Serialize>(request: &R) -> Result<Self, ValidationError> {
        let value = serde_json::to_value(request).map_err(|error| {
            ValidationError::ArgumentEncoding {
                key: String::from("<request>"),
                message: error.to_string(),
            }
        })?;

        let Value::Object(map) = value else {
            return Err(ValidationError::ArgumentsNotObject);
        };

        let mut args = Self::new();
        for (key, value) in map {
            args.insert_value(key, value)?;
        }
        Ok(args)
    }

    pub fn with(
        mut self,
        key: impl Into<String>,
        value: impl Serialize,
    ) -> Result<Self, ValidationError> {
        self.insert(key, value)?;
        Ok(self)
    }

    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Serialize,
    ) -> Result<(), ValidationError> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|error| ValidationError::ArgumentEncoding {
            key: key.clone(),
            message: error.to_string(),
        })?;
        self.insert_value(key, value)
    }

    fn insert_value(&mut self, key: String, value: Value) -> Result<(), ValidationError> {
        validate_key(&key)?;
        if value.is_null() {
            self.0.remove(&key);
        } else {
            self.0.insert(key, value);
        }
        Ok(())
    }

    /// Decodes the arguments into an adapter's request type.
    pub fn decode<R: DeserializeOwned>(&self) -> Result<R, serde_json::Error> {
        serde_json::from_value(self.to_value())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fingerprint(&self, data_type: &DataType) -> Fingerprint {
        Fingerprint(format!("{data_type}|{}", self.to_value()))
    }

    fn to_value(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect::<Map<String, Value>>(),
        )
    }
}

fn validate_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::EmptyArgumentKey);
    }
    if !key.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        return Err(ValidationError::InvalidArgumentKey {
            key: key.to_owned(),
        });
    }
    Ok(())
}

/// Deterministic cache key for a (data type, arguments) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct DailyRequest {
        symbol: String,
        start_date: Option<String>,
        adjust: String,
    }

    #[test]
    fn fingerprint_ignores_insertion_order_and_nulls() {
        let first = FetchArgs::new()
            .with("symbol", "000001")
            .and_then(|args| args.with("adjust", "qfq"))
            .expect("valid args");
        let second = FetchArgs::new()
            .with("adjust", "qfq")
            .and_then(|args| args.with("start_date", Option::<String>::None))
            .and_then(|args| args.with("symbol", "000001"))
            .expect("valid args");

        assert_eq!(
            first.fingerprint(&DataType::CN_STOCK_DAILY),
            second.fingerprint(&DataType::CN_STOCK_DAILY)
        );
    }

    #[test]
    fn fingerprint_separates_data_types() {
        let args = FetchArgs::new().with("symbol", "AAPL").expect("valid args");

        assert_ne!(
            args.fingerprint(&DataType::US_STOCK_DAILY),
            args.fingerprint(&DataType::US_STOCK_QUOTE)
        );
        assert_eq!(
            args.fingerprint(&DataType::US_STOCK_DAILY).as_str(),
            r#"us_stock_daily|{"symbol":"AAPL"}"#
        );
    }

    #[test]
    fn request_struct_converts_and_decodes() {
        let request = DailyRequest {
            symbol: String::from("600519"),
            start_date: Some(String::from("2024-01-01")),
            adjust: String::from("none"),
        };

        let args = FetchArgs::from_request(&request).expect("object request");
        assert_eq!(args.get_str("symbol"), Some("600519"));
        assert_eq!(args.len(), 3);

        let decoded: DailyRequest = args.decode().expect("decodes");
        assert_eq!(decoded, request);
    }

    #[test]
    fn rejects_non_object_requests_and_bad_keys() {
        assert_eq!(
            FetchArgs::from_request(&"AAPL"),
            Err(ValidationError::ArgumentsNotObject)
        );
        assert_eq!(
            FetchArgs::new().with("", 1),
            Err(ValidationError::EmptyArgumentKey)
        );
        assert!(matches!(
            FetchArgs::new().with("start-date", "2024-01-01"),
            Err(ValidationError::InvalidArgumentKey { .. })
        ));
    }
}
