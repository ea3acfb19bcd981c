//! Component registry
//!
//! The registry is an owned catalog built once at startup (see
//! [`crate::builtin_registry`]) and passed by reference to pipelines. Each
//! registration keeps a factory creating fresh instances and one prototype
//! used to answer metadata queries without touching pipeline state.

use crate::core::component::Component;
use std::collections::{BTreeMap, HashMap};

/// Creates a fresh, unconfigured component instance
pub type ComponentFactory = Box<dyn Fn() -> Box<dyn Component>>;

/// One registered component
pub struct Registration {
    /// Position in registration order; breaks scheduling ties
    pub ordinal: usize,
    prototype: Box<dyn Component>,
    factory: ComponentFactory,
}

impl Registration {
    pub fn prototype(&self) -> &dyn Component {
        self.prototype.as_ref()
    }

    pub fn name(&self) -> &'static str {
        self.prototype.name()
    }

    pub fn instantiate(&self) -> Box<dyn Component> {
        (self.factory)()
    }

    pub fn is_leaf(&self) -> bool {
        self.prototype.is_leaf()
    }
}

/// Catalog of analysis components indexed by name and by provided key
#[derive(Default)]
pub struct Registry {
    entries: Vec<Registration>,
    next_ordinal: usize,
    by_name: HashMap<&'static str, Vec<usize>>,
    by_key: HashMap<&'static str, Vec<usize>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component. Duplicate names are kept side by side.
    pub fn register<F>(&mut self, factory: F)
    where
        F: Fn() -> Box<dyn Component> + 'static,
    {
        let prototype = factory();
        let registration = Registration {
            ordinal: self.next_ordinal,
            prototype,
            factory: Box::new(factory),
        };
        self.next_ordinal += 1;
        self.entries.push(registration);
        self.reindex();
    }

    /// Shorthand for components with a `Default` constructor
    pub fn register_default<T>(&mut self)
    where
        T: Component + Default,
    {
        self.register(|| Box::new(T::default()));
    }

    /// Drop every registration with this name. Returns how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.name() != name);
        self.reindex();
        before - self.entries.len()
    }

    fn reindex(&mut self) {
        self.by_name.clear();
        self.by_key.clear();
        for (idx, entry) in self.entries.iter().enumerate() {
            self.by_name.entry(entry.name()).or_default().push(idx);
            for key in entry.prototype.provides() {
                self.by_key.entry(key).or_default().push(idx);
            }
        }
    }

    /// Number of ordinals handed out so far, removed registrations included
    pub fn len(&self) -> usize {
        self.next_ordinal
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.entries.iter()
    }

    /// All registrations named `name`, in registration order. Empty if unknown.
    pub fn lookup(&self, name: &str) -> Vec<&Registration> {
        self.by_name
            .get(name)
            .map(|indices| indices.iter().map(|&i| &self.entries[i]).collect())
            .unwrap_or_default()
    }

    /// Fresh instances of every registration named `name`
    pub fn summon(&self, name: &str) -> Vec<Box<dyn Component>> {
        self.lookup(name)
            .into_iter()
            .map(Registration::instantiate)
            .collect()
    }

    /// Registrations providing `key`, in registration order
    pub fn providers(&self, key: &str) -> Vec<&Registration> {
        self.by_key
            .get(key)
            .map(|indices| indices.iter().map(|&i| &self.entries[i]).collect())
            .unwrap_or_default()
    }

    /// Terminal components
    pub fn leaves(&self) -> Vec<&Registration> {
        self.entries.iter().filter(|e| e.is_leaf()).collect()
    }

    /// Non-terminal components
    pub fn plumbing_items(&self) -> Vec<&Registration> {
        self.entries.iter().filter(|e| !e.is_leaf()).collect()
    }

    /// Registrations grouped by the feature tags they declare
    pub fn featured_items(&self) -> BTreeMap<&'static str, Vec<&Registration>> {
        let mut grouped: BTreeMap<&'static str, Vec<&Registration>> = BTreeMap::new();
        for entry in &self.entries {
            for feature in entry.prototype.features() {
                grouped.entry(feature).or_default().push(entry);
            }
        }
        grouped
    }

    /// Leaf activated by a command-line flag (with or without leading dashes)
    pub fn leaf_by_flag(&self, flag: &str) -> Option<&Registration> {
        let flag = flag.trim_start_matches('-');
        self.entries.iter().find(|e| {
            e.prototype
                .as_leaf()
                .is_some_and(|leaf| leaf.flag() == flag)
        })
    }

    /// Ordinal of the first registration named `name`
    pub fn ordinal_of(&self, name: &str) -> Option<usize> {
        self.lookup(name).first().map(|e| e.ordinal)
    }
}
