use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs::File,
    path::Path,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decode::{Code, DecodeTable, DecodeTables};
use crate::{Error, Kind, Result};

const CHANNELSDB: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/src/channelsdb.json"));

/// A channel as defined in a channel database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDef {
    /// Stable logical name, e.g., `cabin_pressure`.
    pub name: String,
    /// Upstream item identifier, e.g., `USLAB000058`.
    pub id: String,
    pub kind: Kind,
    /// Name of the decode table for status channels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsystem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Channel database document, the data asset a [Catalog] is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDb {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub decode_tables: BTreeMap<String, BTreeMap<Code, String>>,
    #[serde(default)]
    pub channels: Vec<ChannelDef>,
    /// Secondary name to channel name.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl ChannelDb {
    /// The database embedded at compile time.
    ///
    /// # Panics
    /// If the embedded database is not valid JSON, which is checked by this crate's tests.
    #[must_use]
    pub fn builtin() -> Self {
        serde_json::from_str(CHANNELSDB).expect("built-in channel db is not valid")
    }

    /// Read a database from a JSON file.
    ///
    /// # Errors
    /// If the file cannot be opened or is not a valid channel database.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(serde_json::from_reader(File::open(path)?)?)
    }

    /// Add channels, tables, and aliases from `other` whose names are not already defined.
    pub fn merge_missing(&mut self, other: ChannelDb) {
        let names: HashSet<String> = self
            .channels
            .iter()
            .map(|c| c.name.clone())
            .chain(self.aliases.keys().cloned())
            .collect();

        for (name, codes) in other.decode_tables {
            self.decode_tables.entry(name).or_insert(codes);
        }
        for ch in other.channels {
            // skip any that already exist from self
            if names.contains(&ch.name) {
                continue;
            }
            self.channels.push(ch);
        }
        for (alias, target) in other.aliases {
            if names.contains(&alias) {
                continue;
            }
            self.aliases.entry(alias).or_insert(target);
        }
    }
}

/// A catalog channel with its decode table resolved.
#[derive(Debug, Clone, Serialize)]
pub struct Channel {
    #[serde(flatten)]
    def: ChannelDef,
    #[serde(skip)]
    table: Option<Arc<DecodeTable>>,
}

impl Channel {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.def.id
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.def.kind
    }

    #[must_use]
    pub fn decode_table(&self) -> Option<&Arc<DecodeTable>> {
        self.table.as_ref()
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.def.description.as_deref()
    }

    #[must_use]
    pub fn subsystem(&self) -> Option<&str> {
        self.def.subsystem.as_deref()
    }

    #[must_use]
    pub fn unit(&self) -> Option<&str> {
        self.def.unit.as_deref()
    }

    #[must_use]
    pub fn def(&self) -> &ChannelDef {
        &self.def
    }
}

/// Immutable directory of logical channel names to upstream identifiers.
///
/// The default implementation uses the channel database embedded at compile-time. Use
/// [Catalog::with_file] to load a custom database.
///
/// # Example
/// ```
/// use isslive::catalog::Catalog;
///
/// let catalog = Catalog::default();
/// assert_eq!(catalog.identifier("cabin_pressure"), Some("USLAB000058"));
/// assert!(catalog.lookup("not_a_channel").is_none());
/// ```
#[derive(Debug, Clone)]
pub struct Catalog {
    version: String,
    channels: Vec<Channel>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<String, Vec<usize>>,
    aliases: BTreeMap<String, String>,
    tables: DecodeTables,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(ChannelDb::builtin()).expect("built-in channel db is not consistent")
    }
}

impl Catalog {
    /// Validate `db` and build a catalog from it.
    ///
    /// # Errors
    /// If names are duplicated, an identifier is empty, an alias collides or points to a
    /// non-existent channel, a decode table is empty, or a channel references a missing
    /// table.
    pub fn new(db: ChannelDb) -> Result<Self> {
        let tables = DecodeTables::from_map(db.decode_tables)?;

        let mut channels = Vec::with_capacity(db.channels.len());
        let mut by_name: HashMap<String, usize> = HashMap::with_capacity(db.channels.len());
        let mut by_id: HashMap<String, Vec<usize>> = HashMap::with_capacity(db.channels.len());

        for (idx, def) in db.channels.into_iter().enumerate() {
            if def.id.trim().is_empty() {
                return Err(Error::EmptyIdentifier(def.name));
            }
            if by_name.contains_key(&def.name) {
                return Err(Error::DuplicateName(def.name));
            }
            let table = match &def.decode {
                Some(table) => match tables.get(table) {
                    Some(t) => Some(t.clone()),
                    None => {
                        return Err(Error::UnknownDecodeTable {
                            channel: def.name,
                            table: table.clone(),
                        })
                    }
                },
                None if def.kind == Kind::Status => {
                    return Err(Error::MissingDecodeTable(def.name))
                }
                None => None,
            };
            by_name.insert(def.name.clone(), idx);
            by_id.entry(def.id.clone()).or_default().push(idx);
            channels.push(Channel { def, table });
        }

        for (alias, target) in &db.aliases {
            if by_name.contains_key(alias) {
                return Err(Error::InvalidAlias {
                    alias: alias.clone(),
                    reason: "collides with a channel name".to_string(),
                });
            }
            let Some(idx) = channels.iter().position(|c| c.name() == target.as_str()) else {
                return Err(Error::InvalidAlias {
                    alias: alias.clone(),
                    reason: format!("target {target} is not a channel"),
                });
            };
            by_name.insert(alias.clone(), idx);
        }

        debug!(
            version = db.version.as_str(),
            channels = channels.len(),
            tables = tables.len(),
            aliases = db.aliases.len(),
            "built channel catalog"
        );

        Ok(Self {
            version: db.version,
            channels,
            by_name,
            by_id,
            aliases: db.aliases,
            tables,
        })
    }

    /// Load a catalog from a channel database file.
    ///
    /// If `built_in` is true, channels, tables, and aliases from the embedded database that
    /// are not defined in the file are added.
    ///
    /// # Errors
    /// If the file cannot be read or the merged database is not consistent.
    pub fn with_file<P: AsRef<Path>>(path: P, built_in: bool) -> Result<Self> {
        let mut db = ChannelDb::from_file(path)?;
        if built_in {
            db.merge_missing(ChannelDb::builtin());
        }
        Self::new(db)
    }

    /// Resolve a channel name or alias.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Channel> {
        self.by_name.get(name).map(|idx| &self.channels[*idx])
    }

    /// Resolve a channel name or alias to its upstream identifier.
    #[must_use]
    pub fn identifier(&self, name: &str) -> Option<&str> {
        self.lookup(name).map(Channel::id)
    }

    /// Channels published under `id`.
    pub fn by_identifier<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a Channel> + 'a {
        self.by_id
            .get(id)
            .into_iter()
            .flatten()
            .map(|idx| &self.channels[*idx])
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Unique upstream identifiers in catalog order.
    #[must_use]
    pub fn identifiers(&self) -> Vec<String> {
        let mut seen = HashSet::with_capacity(self.channels.len());
        self.channels
            .iter()
            .filter(|c| seen.insert(c.id()))
            .map(|c| c.id().to_string())
            .collect()
    }

    /// All channels in catalog order.
    #[must_use]
    pub fn all(&self) -> &[Channel] {
        &self.channels
    }

    /// Channels whose subsystem matches `subsystem`, ignoring case.
    pub fn subsystem<'a>(&'a self, subsystem: &'a str) -> impl Iterator<Item = &'a Channel> + 'a {
        self.channels.iter().filter(move |c| {
            c.subsystem()
                .is_some_and(|s| s.eq_ignore_ascii_case(subsystem))
        })
    }

    /// Distinct subsystems in catalog order.
    #[must_use]
    pub fn subsystems(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.channels
            .iter()
            .filter_map(Channel::subsystem)
            .filter(|s| seen.insert(*s))
            .collect()
    }

    #[must_use]
    pub fn aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }

    #[must_use]
    pub fn tables(&self) -> &DecodeTables {
        &self.tables
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
