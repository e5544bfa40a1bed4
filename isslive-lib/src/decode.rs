use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use serde::Serialize;

use crate::value::Value;
use crate::{Error, Result};

/// Integer status code as sent by upstream.
///
/// Codes are arbitrary integers, not indexes; some tables use bit values.
pub type Code = i64;

/// Maps integer status codes to display strings.
///
/// # Example
/// ```
/// use std::collections::BTreeMap;
/// use isslive::{decode::DecodeTable, Value};
///
/// let table = DecodeTable::new(
///     "valve",
///     BTreeMap::from([(0, "CLOSED".to_string()), (1, "OPEN".to_string())]),
/// ).unwrap();
///
/// assert_eq!(table.decode("1"), Value::Status("OPEN".into()));
/// // unmapped codes come back verbatim
/// assert_eq!(table.decode("9"), Value::Raw("9".into()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodeTable {
    name: String,
    codes: BTreeMap<Code, String>,
}

impl DecodeTable {
    /// Create a table.
    ///
    /// # Errors
    /// [Error::EmptyDecodeTable] if `codes` is empty.
    pub fn new<N: Into<String>>(name: N, codes: BTreeMap<Code, String>) -> Result<Self> {
        let name = name.into();
        if codes.is_empty() {
            return Err(Error::EmptyDecodeTable(name));
        }
        Ok(Self { name, codes })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn lookup(&self, code: Code) -> Option<&str> {
        self.codes.get(&code).map(String::as_str)
    }

    /// Codes in ascending order.
    pub fn codes(&self) -> impl Iterator<Item = (Code, &str)> {
        self.codes.iter().map(|(code, s)| (*code, s.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Decode raw upstream text.
    ///
    /// Returns [Value::Status] for a mapped code. Text that is not a plain integer (including
    /// float text such as `"1.0"`), or an integer without an entry, is returned unchanged as
    /// [Value::Raw].
    #[must_use]
    pub fn decode(&self, raw: &str) -> Value {
        match parse_code(raw).and_then(|code| self.lookup(code)) {
            Some(s) => Value::Status(s.to_string()),
            None => Value::Raw(raw.to_string()),
        }
    }
}

/// Strict integer parse of a status code; surrounding whitespace is ignored.
fn parse_code(raw: &str) -> Option<Code> {
    raw.trim().parse::<Code>().ok()
}

/// The named set of decode tables channels may reference.
#[derive(Debug, Clone, Default)]
pub struct DecodeTables {
    tables: HashMap<String, Arc<DecodeTable>>,
}

impl DecodeTables {
    /// Build from table name to code map.
    ///
    /// # Errors
    /// [Error::EmptyDecodeTable] if any table has no codes.
    pub fn from_map(map: BTreeMap<String, BTreeMap<Code, String>>) -> Result<Self> {
        let mut tables = HashMap::with_capacity(map.len());
        for (name, codes) in map {
            let table = DecodeTable::new(name.clone(), codes)?;
            tables.insert(name, Arc::new(table));
        }
        Ok(Self { tables })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<DecodeTable>> {
        self.tables.get(name)
    }

    /// All tables sorted by name.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<DecodeTable>> {
        let mut all: Vec<Arc<DecodeTable>> = self.tables.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
