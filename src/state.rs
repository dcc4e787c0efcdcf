// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-unit backup state.
//!
//! Steps that change system state first record the value they are about to
//! overwrite (whether a service was enabled, which directory instance was
//! created). Uninstall consumes those records to undo the work. A record is
//! restorable exactly once: [`StateStore::restore`] removes it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::{InstallError, Result};

/// Installable unit name of the certificate authority.
pub const CA_UNIT: &str = "pki-cad";

/// Installable unit name of the authority's directory server.
pub const CA_DS_UNIT: &str = "pkids";

/// A recorded pre-change value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    /// Boolean flag such as `enabled` or `user_exists`.
    Bool(bool),
    /// String value such as `serverid`.
    Str(String),
}

impl StateValue {
    /// The boolean payload, if this is a flag.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Str(_) => None,
        }
    }

    /// The string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Bool(_) => None,
        }
    }
}

impl From<bool> for StateValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for StateValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for StateValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

/// Named state entries of one installable unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstallableUnit {
    entries: BTreeMap<String, StateValue>,
}

impl InstallableUnit {
    /// Returns true if nothing is recorded for this unit.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look at an entry without consuming it.
    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.entries.get(key)
    }

    fn set(&mut self, key: &str, value: StateValue) {
        self.entries.insert(key.to_string(), value);
    }

    fn take(&mut self, key: &str) -> Option<StateValue> {
        self.entries.remove(key)
    }
}

/// Durable store of backup state, keyed by unit then entry name.
pub trait StateStore: Send {
    /// Record (or overwrite) a value.
    fn backup(&mut self, unit: &str, key: &str, value: StateValue) -> Result<()>;

    /// Remove and return a value; `None` if nothing is recorded.
    fn restore(&mut self, unit: &str, key: &str) -> Result<Option<StateValue>>;

    /// Returns true if any entry is recorded for the unit.
    fn has_state(&self, unit: &str) -> bool;
}

/// Restore a value that must have been backed up.
///
/// # Errors
///
/// Returns [`InstallError::StateAbsent`] if nothing is recorded.
pub fn restore_required<S: StateStore + ?Sized>(
    store: &mut S,
    unit: &str,
    key: &str,
) -> Result<StateValue> {
    store
        .restore(unit, key)?
        .ok_or_else(|| InstallError::state_absent(unit, key))
}

/// In-process state store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    units: BTreeMap<String, InstallableUnit>,
}

impl MemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look at a unit without consuming anything.
    pub fn unit(&self, unit: &str) -> Option<&InstallableUnit> {
        self.units.get(unit)
    }
}

fn backup_into(
    units: &mut BTreeMap<String, InstallableUnit>,
    unit: &str,
    key: &str,
    value: StateValue,
) {
    units.entry(unit.to_string()).or_default().set(key, value);
}

fn restore_from(
    units: &mut BTreeMap<String, InstallableUnit>,
    unit: &str,
    key: &str,
) -> Option<StateValue> {
    let entries = units.get_mut(unit)?;
    let value = entries.take(key);
    if entries.is_empty() {
        units.remove(unit);
    }
    value
}

impl StateStore for MemoryStateStore {
    fn backup(&mut self, unit: &str, key: &str, value: StateValue) -> Result<()> {
        backup_into(&mut self.units, unit, key, value);
        Ok(())
    }

    fn restore(&mut self, unit: &str, key: &str) -> Result<Option<StateValue>> {
        Ok(restore_from(&mut self.units, unit, key))
    }

    fn has_state(&self, unit: &str) -> bool {
        self.units.contains_key(unit)
    }
}

/// State store persisted as a JSON document.
///
/// Every mutation rewrites the whole file so that an interrupted install
/// still leaves the recorded state behind for uninstall.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    units: BTreeMap<String, InstallableUnit>,
}

impl FileStateStore {
    /// Open a store, loading existing state if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let units = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&contents).map_err(|e| {
                    InstallError::config(format!(
                        "Failed to parse state file {}: {}",
                        path.display(),
                        e
                    ))
                })?
            }
        } else {
            BTreeMap::new()
        };

        tracing::debug!("Opened state store at {}", path.display());
        Ok(Self { path, units })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&self.units)
            .map_err(|e| InstallError::config(format!("Failed to encode state: {}", e)))?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn backup(&mut self, unit: &str, key: &str, value: StateValue) -> Result<()> {
        tracing::debug!("Backing up {}.{} = {:?}", unit, key, value);
        backup_into(&mut self.units, unit, key, value);
        self.save()
    }

    fn restore(&mut self, unit: &str, key: &str) -> Result<Option<StateValue>> {
        let value = restore_from(&mut self.units, unit, key);
        if value.is_some() {
            self.save()?;
        }
        Ok(value)
    }

    fn has_state(&self, unit: &str) -> bool {
        self.units.contains_key(unit)
    }
}

/// A state store shared by the installers of one run.
///
/// The authority and its directory server record into the same store;
/// clones of this handle all see the same records.
#[derive(Clone)]
pub struct SharedStateStore {
    inner: Arc<Mutex<Box<dyn StateStore>>>,
}

impl std::fmt::Debug for SharedStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStateStore").finish_non_exhaustive()
    }
}

impl SharedStateStore {
    /// Share a store.
    pub fn new(store: impl StateStore + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(store))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn StateStore>> {
        // A panic while holding the lock leaves the records intact.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record (or overwrite) a value.
    pub fn backup(&self, unit: &str, key: &str, value: impl Into<StateValue>) -> Result<()> {
        self.lock().backup(unit, key, value.into())
    }

    /// Remove and return a value; `None` if nothing is recorded.
    pub fn restore(&self, unit: &str, key: &str) -> Result<Option<StateValue>> {
        self.lock().restore(unit, key)
    }

    /// Returns true if any entry is recorded for the unit.
    pub fn has_state(&self, unit: &str) -> bool {
        self.lock().has_state(unit)
    }
}

impl StateStore for SharedStateStore {
    fn backup(&mut self, unit: &str, key: &str, value: StateValue) -> Result<()> {
        SharedStateStore::backup(self, unit, key, value)
    }

    fn restore(&mut self, unit: &str, key: &str) -> Result<Option<StateValue>> {
        SharedStateStore::restore(self, unit, key)
    }

    fn has_state(&self, unit: &str) -> bool {
        SharedStateStore::has_state(self, unit)
    }
}
