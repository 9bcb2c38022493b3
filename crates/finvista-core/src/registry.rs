//! Ordered failover chains of named sources, one chain per data type.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::data_source::DataSource;
use crate::{ConfigError, DataType};

/// One named adapter inside a chain.
#[derive(Clone)]
pub struct SourceEntry {
    pub name: String,
    /// Lower is tried first.
    pub priority: i32,
    seq: u64,
    pub source: Arc<dyn DataSource>,
}

impl std::fmt::Debug for SourceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceEntry")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

/// Registry of failover chains.
///
/// Each chain is kept sorted by `(priority, registration order)`, which is a
/// strict total order: registration order is a process-wide sequence number.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    chains: RwLock<HashMap<DataType, Vec<SourceEntry>>>,
    next_seq: AtomicU64,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<DataType, Vec<SourceEntry>>> {
        self.chains
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<DataType, Vec<SourceEntry>>> {
        self.chains
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds `name` to the chain for `data_type`, or replaces the adapter and
    /// priority of an existing entry with that name. A replaced entry keeps
    /// its registration order. Returns true when an entry was replaced.
    pub fn register(
        &self,
        data_type: DataType,
        name: impl Into<String>,
        source: Arc<dyn DataSource>,
        priority: i32,
    ) -> Result<bool, ConfigError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::EmptySourceName);
        }

        let mut chains = self.write();
        let chain = chains.entry(data_type).or_default();

        let replaced = match chain.iter_mut().find(|entry| entry.name == name) {
            Some(entry) => {
                entry.source = source;
                entry.priority = priority;
                true
            }
            None => {
                chain.push(SourceEntry {
                    name,
                    priority,
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                    source,
                });
                false
            }
        };

        sort_chain(chain);
        Ok(replaced)
    }

    /// Source names in attempt order. Empty for an unknown data type.
    pub fn sources(&self, data_type: &DataType) -> Vec<String> {
        self.read()
            .get(data_type)
            .map(|chain| chain.iter().map(|entry| entry.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Snapshot of the chain in attempt order.
    pub fn entries(&self, data_type: &DataType) -> Vec<SourceEntry> {
        self.read().get(data_type).cloned().unwrap_or_default()
    }

    pub fn contains(&self, data_type: &DataType, name: &str) -> bool {
        self.read()
            .get(data_type)
            .is_some_and(|chain| chain.iter().any(|entry| entry.name == name))
    }

    /// Rewrites priorities so the chain is tried exactly in `order`.
    ///
    /// `order` must name every registered source once and nothing else.
    pub fn set_priority<S: AsRef<str>>(
        &self,
        data_type: &DataType,
        order: &[S],
    ) -> Result<(), ConfigError> {
        let given = order
            .iter()
            .map(|name| name.as_ref().to_owned())
            .collect::<Vec<_>>();

        let mut seen = HashSet::with_capacity(given.len());
        for name in &given {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateSourceName {
                    data_type: data_type.clone(),
                    name: name.clone(),
                });
            }
        }

        let mut chains = self.write();
        let Some(chain) = chains.get_mut(data_type) else {
            return Err(ConfigError::UnknownDataType {
                data_type: data_type.clone(),
            });
        };

        let registered = chain
            .iter()
            .map(|entry| entry.name.as_str())
            .collect::<HashSet<_>>();
        if registered != seen {
            return Err(ConfigError::PriorityMismatch {
                data_type: data_type.clone(),
                expected: chain.iter().map(|entry| entry.name.clone()).collect(),
                given,
            });
        }

        for entry in chain.iter_mut() {
            if let Some(position) = given.iter().position(|name| *name == entry.name) {
                entry.priority = i32::try_from(position).unwrap_or(i32::MAX);
            }
        }
        sort_chain(chain);
        Ok(())
    }

    /// Registered data types, sorted by name.
    pub fn data_types(&self) -> Vec<DataType> {
        let mut data_types = self.read().keys().cloned().collect::<Vec<_>>();
        data_types.sort();
        data_types
    }
}

fn sort_chain(chain: &mut [SourceEntry]) {
    chain.sort_by_key(|entry| (entry.priority, entry.seq));
}
