//! Kind name → role factory.

use std::collections::BTreeMap;

use anyhow::{Result, anyhow};

use crate::io::config::RoleEntry;
use crate::io::layout::Workspace;

use super::{BuiltinRole, Role, RoleConfig, RoleKind};

/// Everything a factory needs to build one role instance.
#[derive(Debug, Clone, Copy)]
pub struct RoleSpec<'a> {
    pub name: &'a str,
    pub entry: &'a RoleEntry,
    pub workspace: &'a Workspace,
}

pub type RoleFactory = Box<dyn Fn(&RoleSpec<'_>) -> Result<Box<dyn Role>>>;

/// Extension point for role kinds beyond the built-in four.
#[derive(Default)]
pub struct Registry {
    factories: BTreeMap<String, RoleFactory>,
}

impl Registry {
    /// A registry with no kinds.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `executor`, `assigner`, `monitor` and `auditor`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for kind in RoleKind::ALL {
            registry.register(kind.as_str(), move |spec: &RoleSpec<'_>| {
                let config = RoleConfig::builtin(
                    kind,
                    spec.workspace,
                    spec.name,
                    spec.entry.target.as_deref(),
                )?;
                Ok(Box::new(BuiltinRole::new(kind, config)) as Box<dyn Role>)
            });
        }
        registry
    }

    /// Add or replace the factory for `kind`.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&RoleSpec<'_>) -> Result<Box<dyn Role>> + 'static,
    {
        self.factories.insert(kind.to_string(), Box::new(factory));
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn build(&self, spec: &RoleSpec<'_>) -> Result<Box<dyn Role>> {
        let factory = self.factories.get(&spec.entry.kind).ok_or_else(|| {
            anyhow!(
                "role {} has unknown kind {:?} (known: {})",
                spec.name,
                spec.entry.kind,
                self.kinds().collect::<Vec<_>>().join(", ")
            )
        })?;
        factory(spec)
    }
}
