//! Environment transform.
//!
//! The child's environment is computed from a snapshot of the current
//! environment plus an ordered list of directives. `NAME=VALUE` sets or
//! replaces `NAME`, a bare `NAME` removes it. Directives are applied strictly
//! in order, so a later directive wins over an earlier one for the same name.

use crate::error::{Result, SpawnError};
use std::ffi::{OsStr, OsString};
use tracing::debug;

/// Number of entries a platform environment table can hold
pub const MAX_ENV_ENTRIES: usize = 256;

/// A single parsed environment directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChange {
    Set { name: String, value: String },
    Remove { name: String },
}

impl EnvChange {
    pub fn parse(directive: &str) -> Result<Self> {
        let change = match directive.split_once('=') {
            Some((name, value)) => EnvChange::Set {
                name: name.to_string(),
                value: value.to_string(),
            },
            None => EnvChange::Remove {
                name: directive.to_string(),
            },
        };

        if change.name().is_empty() {
            return Err(SpawnError::InvalidArgument(format!(
                "environment directive '{directive}' has no variable name"
            )));
        }
        Ok(change)
    }

    pub fn parse_all(directives: &[&str]) -> Result<Vec<Self>> {
        directives.iter().map(|d| Self::parse(d)).collect()
    }

    pub fn name(&self) -> &str {
        match self {
            EnvChange::Set { name, .. } | EnvChange::Remove { name } => name,
        }
    }
}

/// Where the child's environment comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvSource<'a> {
    /// Inherit the parent's environment unchanged
    Inherit,
    /// Parent environment with the directives applied in order
    Changes(&'a [&'a str]),
    /// Exactly these `NAME=VALUE` entries
    Replace(&'a [&'a str]),
}

impl EnvSource<'_> {
    /// Resolve into a concrete environment, or `None` for plain inheritance
    pub fn resolve(&self, capacity: Option<usize>) -> Result<Option<Environment>> {
        match self {
            EnvSource::Inherit => Ok(None),
            EnvSource::Changes(directives) => {
                let changes = EnvChange::parse_all(directives)?;
                let mut env = Environment::capture();
                if let Some(limit) = capacity {
                    env = env.with_capacity_limit(limit)?;
                }
                env.apply_all(&changes)?;
                Ok(Some(env))
            }
            EnvSource::Replace(entries) => {
                let mut env = Environment::default();
                if let Some(limit) = capacity {
                    env = env.with_capacity_limit(limit)?;
                }
                for entry in entries.iter() {
                    match EnvChange::parse(entry)? {
                        change @ EnvChange::Set { .. } => env.apply(&change)?,
                        EnvChange::Remove { name } => {
                            return Err(SpawnError::InvalidArgument(format!(
                                "replacement environment entry '{name}' has no value"
                            )));
                        }
                    }
                }
                Ok(Some(env))
            }
        }
    }
}

/// An ordered environment table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    entries: Vec<(OsString, OsString)>,
    capacity: Option<usize>,
}

impl Environment {
    /// Snapshot of the current process environment
    pub fn capture() -> Self {
        Self::from_entries(std::env::vars_os())
    }

    pub fn from_entries<K, V, I>(iter: I) -> Self
    where
        K: Into<OsString>,
        V: Into<OsString>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            capacity: None,
        }
    }

    /// Enforce a fixed entry capacity; an environment that is already over
    /// the limit is rejected immediately.
    ///
    /// The last slot of the table stays reserved: a directive may only add
    /// an entry while fewer than `limit - 1` are present.
    pub fn with_capacity_limit(mut self, limit: usize) -> Result<Self> {
        if self.entries.len() > limit {
            return Err(SpawnError::TooLarge(format!(
                "environment has {} entries, limit is {limit}",
                self.entries.len()
            )));
        }
        self.capacity = Some(limit);
        Ok(self)
    }

    pub fn get(&self, name: impl AsRef<OsStr>) -> Option<&OsStr> {
        let name = name.as_ref();
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_os_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.entries.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }

    pub fn apply(&mut self, change: &EnvChange) -> Result<()> {
        let name = OsStr::new(change.name());
        self.entries.retain(|(k, _)| k != name);

        if let EnvChange::Set { name, value } = change {
            if let Some(limit) = self.capacity {
                if self.entries.len() + 1 >= limit {
                    debug!(name = %name, limit, "environment table is full");
                    return Err(SpawnError::TooLarge(format!(
                        "cannot add '{name}': environment limit of {limit} entries reached"
                    )));
                }
            }
            self.entries.push((name.into(), value.into()));
        }
        Ok(())
    }

    pub fn apply_all(&mut self, changes: &[EnvChange]) -> Result<()> {
        changes.iter().try_for_each(|change| self.apply(change))
    }
}
