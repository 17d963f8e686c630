//! Schema registry: ordered setting descriptors.
//!
//! Readers take a lock-free snapshot; the rare writers (startup, extensions,
//! reordering) publish a new snapshot through `ArcSwap`.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::options::descriptor::{Section, SettingDescriptor};
use crate::options::error::StoreError;

#[derive(Debug, Clone, Default)]
struct Schema {
    order: Vec<Arc<SettingDescriptor>>,
    index: HashMap<String, usize>,
}

impl Schema {
    fn push(&mut self, descriptor: Arc<SettingDescriptor>) {
        self.index.insert(descriptor.key.clone(), self.order.len());
        self.order.push(descriptor);
    }

    fn rebuilt(order: Vec<Arc<SettingDescriptor>>) -> Self {
        let mut schema = Schema::default();
        for descriptor in order {
            schema.push(descriptor);
        }
        schema
    }
}

#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schema: ArcSwap<Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors<I>(descriptors: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = SettingDescriptor>,
    {
        let mut schema = Schema::default();
        for descriptor in descriptors {
            if schema.index.contains_key(&descriptor.key) {
                return Err(StoreError::DuplicateKey(descriptor.key));
            }
            schema.push(Arc::new(descriptor));
        }
        Ok(Self {
            schema: ArcSwap::from_pointee(schema),
        })
    }

    /// Append a descriptor. Keys are never replaced or removed.
    ///
    /// Stores register through [`OptionsStore::register`](crate::options::OptionsStore::register)
    /// so a value loaded before the key existed is adopted.
    pub(crate) fn register(&self, descriptor: SettingDescriptor) -> Result<(), StoreError> {
        let descriptor = Arc::new(descriptor);
        let mut duplicate = false;
        self.schema.rcu(|current| {
            if current.index.contains_key(&descriptor.key) {
                duplicate = true;
                Arc::clone(current)
            } else {
                duplicate = false;
                let mut next = Schema::clone(current);
                next.push(Arc::clone(&descriptor));
                Arc::new(next)
            }
        });

        if duplicate {
            Err(StoreError::DuplicateKey(descriptor.key.clone()))
        } else {
            Ok(())
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<SettingDescriptor>> {
        let schema = self.schema.load();
        schema.index.get(key).map(|&i| Arc::clone(&schema.order[i]))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.schema.load().index.contains_key(key)
    }

    /// Descriptors in registry order.
    pub fn descriptors(&self) -> Vec<Arc<SettingDescriptor>> {
        self.schema.load().order.clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.schema.load().order.iter().map(|d| d.key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.schema.load().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stable reorder so each section's keys are contiguous, sections in
    /// first-seen order.
    pub fn reorder_by_section(&self) {
        self.schema.rcu(|current| {
            let mut first_seen: HashMap<&Section, usize> = HashMap::new();
            for descriptor in &current.order {
                let next = first_seen.len();
                first_seen.entry(&descriptor.section).or_insert(next);
            }
            let mut order = current.order.clone();
            order.sort_by_key(|d| first_seen[&d.section]);
            Arc::new(Schema::rebuilt(order))
        });
    }
}
