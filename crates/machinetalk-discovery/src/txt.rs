//! DNS-SD TXT record parsing
//!
//! A text record is an ordered list of `key` or `key=value` tokens. Machinetalk
//! services carry three required keys: `uuid`, `dsn` and `service`.

use serde::Serialize;
use std::collections::HashMap;

/// Key holding the machine identifier
pub const UUID_KEY: &str = "uuid";
/// Key holding the connection string of the service
pub const DSN_KEY: &str = "dsn";
/// Key holding the service name
pub const SERVICE_KEY: &str = "service";

/// Keys every Machinetalk record must carry
pub const REQUIRED_KEYS: [&str; 3] = [UUID_KEY, DSN_KEY, SERVICE_KEY];

/// Decoded TXT record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TxtRecord {
    entries: HashMap<String, String>,
}

impl TxtRecord {
    /// Parses raw TXT tokens.
    ///
    /// A token without `=` maps to an empty value; otherwise the token is split
    /// on the first `=` only, so values may themselves contain `=`. Tokens with
    /// an empty key are dropped, and when a key repeats the first occurrence wins.
    pub fn parse<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries = HashMap::new();
        for token in tokens {
            let token = token.as_ref();
            let (key, value) = token.split_once('=').unwrap_or((token, ""));
            if key.is_empty() {
                continue;
            }
            entries
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn into_inner(self) -> HashMap<String, String> {
        self.entries
    }
}

/// The three required attributes of a Machinetalk service record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceRecord {
    pub uuid: String,
    pub dsn: String,
    pub service: String,
}

impl ServiceRecord {
    /// Extracts the required attributes, or `None` when any of them is missing.
    ///
    /// Presence is all that is checked; a key announced without a value yields
    /// an empty string.
    pub fn from_txt(txt: &TxtRecord) -> Option<Self> {
        Some(Self {
            uuid: txt.get(UUID_KEY)?.to_string(),
            dsn: txt.get(DSN_KEY)?.to_string(),
            service: txt.get(SERVICE_KEY)?.to_string(),
        })
    }

    /// Parses raw TXT tokens straight into a service record
    pub fn parse<I, S>(tokens: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::from_txt(&TxtRecord::parse(tokens))
    }
}
