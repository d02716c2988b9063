use crate::env::EnvChange;
use crate::error::{Result, SpawnError};
use crate::flags::SpawnFlags;
use crate::process::validate_program;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Serializable description of a process launch
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
#[builder(setter(into))]
pub struct SpawnConfig {
    /// Path of the program to execute; no `PATH` search is performed
    pub program: PathBuf,

    #[serde(default)]
    #[builder(default)]
    #[builder(setter(custom))]
    pub args: Vec<String>,

    #[serde(default)]
    #[builder(default)]
    pub flags: SpawnFlags,

    /// Ordered `NAME=VALUE` / `NAME` directives applied to the parent environment
    #[serde(default)]
    #[builder(default)]
    #[builder(setter(custom))]
    pub env_changes: Vec<String>,

    /// Replacement environment; exclusive with `env_changes`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    #[builder(setter(custom))]
    pub environ: Option<Vec<String>>,
}

impl SpawnConfig {
    pub fn builder() -> SpawnConfigBuilder {
        SpawnConfigBuilder::default()
    }

    /// Check flags and environment directives without touching the OS
    pub fn validate(&self, want_handle: bool) -> Result<()> {
        validate_program(&self.program)?;
        self.flags.validate(want_handle)?;

        if self.environ.is_some() && !self.env_changes.is_empty() {
            return Err(SpawnError::InvalidArgument(
                "environment changes and a replacement environment are exclusive".to_string(),
            ));
        }
        for directive in &self.env_changes {
            EnvChange::parse(directive)?;
        }
        if let Some(environ) = &self.environ {
            for entry in environ {
                if let EnvChange::Remove { name } = EnvChange::parse(entry)? {
                    return Err(SpawnError::InvalidArgument(format!(
                        "replacement environment entry '{name}' has no value"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Borrowed views of the environment lists, in the shape the launchers take
    pub fn env_change_refs(&self) -> Vec<&str> {
        self.env_changes.iter().map(String::as_str).collect()
    }

    pub fn environ_refs(&self) -> Option<Vec<&str>> {
        self.environ
            .as_ref()
            .map(|entries| entries.iter().map(String::as_str).collect())
    }
}

impl SpawnConfigBuilder {
    pub fn args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.args = Some(args);
        self
    }

    pub fn arg<S: ToString>(&mut self, arg: S) -> &mut Self {
        self.args
            .get_or_insert_with(Vec::new)
            .push(arg.to_string());
        self
    }

    pub fn env_change<T: ToString>(&mut self, directive: T) -> &mut Self {
        self.env_changes
            .get_or_insert_with(Vec::new)
            .push(directive.to_string());
        self
    }

    pub fn env_set<K: ToString, V: ToString>(&mut self, key: K, value: V) -> &mut Self {
        self.env_change(format!("{}={}", key.to_string(), value.to_string()))
    }

    pub fn environ<T: ToString, I: IntoIterator<Item = T>>(&mut self, iter: I) -> &mut Self {
        let entries: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.environ = Some(Some(entries));
        self
    }
}
