//! Named node tree used to persist protocol state with the session.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, fs, io, path::Path, str::FromStr, sync::Arc};

use super::Error;

/// Name of the top-level node of every protocol's state.
pub const STATE_NODE_NAME: &str = "Protocol";

/// Current state schema.
///
/// - 1: `name`, `active`.
/// - 2: adds `feedback`.
pub const STATE_VERSION: u32 = 2;

pub const VERSION_ATTR: &str = "version";

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn set_attr(&mut self, key: &str, value: impl fmt::Display) {
        self.attrs.insert(key.to_string(), value.to_string());
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// Parses an optional attribute.
    ///
    /// A missing attribute is `Ok(None)`, a value which doesn't parse is an
    /// error.
    pub fn parse_attr<T: FromStr>(&self, key: &str) -> Result<Option<T>, Error> {
        match self.attr(key) {
            Some(value) => value.parse().map(Some).map_err(|_| {
                Error::MalformedState(
                    format!("{}: invalid {key} value {value:?}", self.name).into(),
                )
            }),
            None => Ok(None),
        }
    }

    /// Parses an attribute which must be present.
    pub fn require_attr<T: FromStr>(&self, key: &str) -> Result<T, Error> {
        self.parse_attr(key)?.ok_or_else(|| {
            Error::MalformedState(format!("{}: missing {key}", self.name).into())
        })
    }

    pub fn add_child(&mut self, child: Node) {
        self.children.push(child);
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Version the node was written with, 1 if it predates the attribute.
    pub fn version(&self) -> Result<u32, Error> {
        Ok(self.parse_attr(VERSION_ATTR)?.unwrap_or(1))
    }

    pub fn expect_name(&self, expected: &'static str) -> Result<(), Error> {
        if self.name != expected {
            return Err(Error::UnexpectedNode {
                expected,
                found: Arc::from(self.name.as_str()),
            });
        }

        Ok(())
    }

    pub fn to_writer(&self, writer: impl io::Write) -> Result<(), Error> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn from_reader(reader: impl io::Read) -> Result<Self, Error> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let file = fs::File::create(path)?;
        self.to_writer(io::BufWriter::new(file))?;

        log::debug!("Saved {} state to {}", self.name, path.display());

        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let file = fs::File::open(path)?;
        let node = Self::from_reader(io::BufReader::new(file))?;

        log::debug!("Loaded {} state from {}", node.name, path.display());

        Ok(node)
    }
}
