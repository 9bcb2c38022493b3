use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Logical fetch category routed to one ordered chain of sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataType(Cow<'static, str>);

impl DataType {
    pub const CN_STOCK_DAILY: Self = Self::from_static("cn_stock_daily");
    pub const CN_STOCK_QUOTE: Self = Self::from_static("cn_stock_quote");
    pub const CN_STOCK_LIST: Self = Self::from_static("cn_stock_list");
    pub const CN_INDEX_DAILY: Self = Self::from_static("cn_index_daily");
    pub const CN_INDEX_QUOTE: Self = Self::from_static("cn_index_quote");
    pub const CN_FUND_NAV: Self = Self::from_static("cn_fund_nav");
    pub const CN_FUND_LIST: Self = Self::from_static("cn_fund_list");
    pub const CN_FUND_QUOTE: Self = Self::from_static("cn_fund_quote");
    pub const US_STOCK_DAILY: Self = Self::from_static("us_stock_daily");
    pub const US_STOCK_QUOTE: Self = Self::from_static("us_stock_quote");

    pub const BUILTIN: [Self; 10] = [
        Self::CN_STOCK_DAILY,
        Self::CN_STOCK_QUOTE,
        Self::CN_STOCK_LIST,
        Self::CN_INDEX_DAILY,
        Self::CN_INDEX_QUOTE,
        Self::CN_FUND_NAV,
        Self::CN_FUND_LIST,
        Self::CN_FUND_QUOTE,
        Self::US_STOCK_DAILY,
        Self::US_STOCK_QUOTE,
    ];

    /// Builds a data type from a literal without validation.
    ///
    /// Reserved for compile-time constants; runtime names go through
    /// [`DataType::parse`].
    pub const fn from_static(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }

    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let trimmed = value.trim();
        let valid = !trimmed.is_empty()
            && trimmed.starts_with(|ch: char| ch.is_ascii_lowercase())
            && trimmed
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_');

        if !valid {
            return Err(ValidationError::InvalidDataType {
                value: value.to_owned(),
            });
        }

        Ok(Self(Cow::Owned(trimmed.to_owned())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for DataType {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.0.into_owned()
    }
}
