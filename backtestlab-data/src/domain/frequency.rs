//! Sampling period of a time series.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bar frequency. The short code (`"1d"`, `"1wk"`, ...) is persisted in file
/// names and sent to providers as the interval, so codes must never change.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum DataFrequency {
    Minute1,
    Minute5,
    Minute15,
    Minute30,
    Hour1,
    Hour4,
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl DataFrequency {
    /// Every frequency, shortest period first.
    pub const ALL: [DataFrequency; 9] = [
        DataFrequency::Minute1,
        DataFrequency::Minute5,
        DataFrequency::Minute15,
        DataFrequency::Minute30,
        DataFrequency::Hour1,
        DataFrequency::Hour4,
        DataFrequency::Daily,
        DataFrequency::Weekly,
        DataFrequency::Monthly,
    ];

    /// Canonical short code.
    pub const fn code(self) -> &'static str {
        match self {
            DataFrequency::Minute1 => "1m",
            DataFrequency::Minute5 => "5m",
            DataFrequency::Minute15 => "15m",
            DataFrequency::Minute30 => "30m",
            DataFrequency::Hour1 => "1h",
            DataFrequency::Hour4 => "4h",
            DataFrequency::Daily => "1d",
            DataFrequency::Weekly => "1wk",
            DataFrequency::Monthly => "1mo",
        }
    }

    /// Returns the frequency whose code is exactly `code`.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.code() == code)
    }

    pub const fn is_intraday(self) -> bool {
        matches!(
            self,
            DataFrequency::Minute1
                | DataFrequency::Minute5
                | DataFrequency::Minute15
                | DataFrequency::Minute30
                | DataFrequency::Hour1
                | DataFrequency::Hour4
        )
    }
}

impl fmt::Display for DataFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for DataFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s.trim()).ok_or_else(|| format!("unknown frequency code '{s}'"))
    }
}

impl TryFrom<String> for DataFrequency {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DataFrequency> for String {
    fn from(value: DataFrequency) -> Self {
        value.code().to_string()
    }
}
