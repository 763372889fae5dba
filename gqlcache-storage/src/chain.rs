//! Ordered chain of cache layers.
//!
//! Layers are listed fastest first. Loads go local-first and fall back down
//! the chain; a hit in a lower layer is copied into the layers above it.
//! Writes and deletes reach the last (durable) layer before the ones in
//! front of it, so durable state is authoritative when a layer fails. The
//! changed set of a merge is the last layer's: upper layers may have evicted
//! records that are still stored below.

use std::collections::BTreeSet;

use gqlcache_core::{CacheHeaders, CacheResult, ChangedKeys, Record, RecordSet};
use gqlcache_normalizer::RecordSource;

use crate::traits::{CacheDump, NormalizedCache};

/// Name a chain reports for itself.
pub const CHAIN_NAME: &str = "chain";

pub struct CacheChain {
    layers: Vec<Box<dyn NormalizedCache>>,
}

impl CacheChain {
    pub fn builder() -> CacheChainBuilder {
        CacheChainBuilder::default()
    }

    /// Layer names, fastest first.
    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Keys reachable from `root` through any layer's copy of each record.
    ///
    /// Layers can hold different subsets, so every layer is consulted for
    /// every key. Empty when no layer holds `root`.
    fn reachable_from(&self, root: &str) -> CacheResult<Vec<String>> {
        let mut visited = BTreeSet::new();
        let mut reachable = Vec::new();
        let mut pending = vec![root.to_string()];

        while let Some(key) = pending.pop() {
            if !visited.insert(key.clone()) {
                continue;
            }
            let mut found = false;
            for layer in &self.layers {
                if let Some(record) = layer.load(&key, &CacheHeaders::none())? {
                    pending.extend(record.referenced_keys());
                    found = true;
                }
            }
            if found {
                reachable.push(key);
            } else if key == root {
                return Ok(Vec::new());
            } else {
                tracing::warn!(key = %key, root = %root, "Cascaded remove found no record");
            }
        }
        Ok(reachable)
    }
}

impl NormalizedCache for CacheChain {
    fn name(&self) -> &str {
        CHAIN_NAME
    }

    fn load(&self, key: &str, headers: &CacheHeaders) -> CacheResult<Option<Record>> {
        for (depth, layer) in self.layers.iter().enumerate() {
            let Some(record) = layer.load(key, headers)? else {
                continue;
            };

            if headers.evict_after_read() {
                // Upper layers already missed; drop any copy further down.
                for lower in &self.layers[depth + 1..] {
                    lower.remove_record(key)?;
                }
            } else if depth > 0 {
                let promoted: RecordSet = std::iter::once(record.clone()).collect();
                for upper in &self.layers[..depth] {
                    upper.merge(&promoted, &CacheHeaders::none())?;
                }
                tracing::debug!(key = %key, layer = layer.name(), "Promoted record to upper layers");
            }
            return Ok(Some(record));
        }
        Ok(None)
    }

    fn merge(&self, records: &RecordSet, headers: &CacheHeaders) -> CacheResult<ChangedKeys> {
        let mut layers = self.layers.iter().rev();
        let Some(last) = layers.next() else {
            return Ok(ChangedKeys::new());
        };
        let changed = last.merge(records, headers)?;
        for layer in layers {
            layer.merge(records, headers)?;
        }
        Ok(changed)
    }

    fn remove_record(&self, key: &str) -> CacheResult<Option<Record>> {
        let mut removed = None;
        for layer in self.layers.iter().rev() {
            removed = layer.remove_record(key)?.or(removed);
        }
        Ok(removed)
    }

    /// The subgraph is walked once across all layers, then each key is
    /// removed from every layer.
    fn remove_subgraph(&self, key: &str) -> CacheResult<Vec<String>> {
        let reachable = self.reachable_from(key)?;
        for k in &reachable {
            self.remove_record(k)?;
        }
        Ok(reachable)
    }

    fn clear_all(&self) -> CacheResult<()> {
        for layer in self.layers.iter().rev() {
            layer.clear_all()?;
        }
        Ok(())
    }

    fn dump(&self) -> CacheResult<CacheDump> {
        let mut dump = CacheDump::new();
        for layer in &self.layers {
            dump.extend(layer.dump()?);
        }
        Ok(dump)
    }
}

impl RecordSource for CacheChain {
    fn load_record(&self, key: &str, headers: &CacheHeaders) -> CacheResult<Option<Record>> {
        self.load(key, headers)
    }
}

/// Builder for [`CacheChain`].
#[derive(Default)]
pub struct CacheChainBuilder {
    layers: Vec<Box<dyn NormalizedCache>>,
}

impl CacheChainBuilder {
    /// Append a layer behind the ones already added.
    pub fn layer<C: NormalizedCache + 'static>(mut self, layer: C) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn boxed_layer(mut self, layer: Box<dyn NormalizedCache>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn build(self) -> CacheChain {
        CacheChain {
            layers: self.layers,
        }
    }
}
