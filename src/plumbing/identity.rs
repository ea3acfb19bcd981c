//! Developer identities
//!
//! Signatures of the whole requested commit list are matched up front, so the
//! developer index of an author is the same on every line of history.
//! Two signatures belong to the same developer when they share a lowercase
//! email or a lowercase name, unless exact matching is requested.

use super::{DEPENDENCY_AUTHOR, DEPENDENCY_PEOPLE};
use crate::core::{
    fork_copies, Component, ConfigurationOption, Fact, FactStore, OptionKind, OptionValue,
    Options, Outputs, RunContext, Signature,
};
use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;

pub const CONFIG_EXACT_SIGNATURES: &str = "IdentityDetector.ExactSignatures";

/// Developer index → "name|email"
pub type People = Vec<String>;

#[derive(Clone, Default)]
pub struct IdentityDetector {
    exact: bool,
    /// Lookup keys ("name:...", "email:..." or the exact signature) → index
    index: FxHashMap<String, usize>,
    people: Arc<People>,
}

impl IdentityDetector {
    pub fn new() -> Self {
        Self::default()
    }

    fn keys(&self, signature: &Signature) -> Vec<String> {
        if self.exact {
            return vec![format!("{}|{}", signature.name, signature.email)];
        }
        let mut keys = Vec::with_capacity(2);
        if !signature.email.is_empty() {
            keys.push(format!("email:{}", signature.email.to_lowercase()));
        }
        if !signature.name.is_empty() {
            keys.push(format!("name:{}", signature.name.to_lowercase()));
        }
        keys
    }

    /// Assign developer indexes to every signature in `signatures`
    fn build<'a>(&mut self, signatures: impl Iterator<Item = &'a Signature>) {
        let mut index: FxHashMap<String, usize> = FxHashMap::default();
        let mut people = People::new();
        for signature in signatures {
            let keys = self.keys(signature);
            let id = match keys.iter().find_map(|key| index.get(key).copied()) {
                Some(id) => id,
                None => {
                    people.push(format!(
                        "{}|{}",
                        signature.name.to_lowercase(),
                        signature.email.to_lowercase()
                    ));
                    people.len() - 1
                }
            };
            for key in keys {
                index.entry(key).or_insert(id);
            }
        }
        debug!("IdentityDetector: {} developers", people.len());
        self.index = index;
        self.people = Arc::new(people);
    }

    /// Developer index of `signature`
    pub fn lookup(&self, signature: &Signature) -> Option<usize> {
        self.keys(signature)
            .iter()
            .find_map(|key| self.index.get(key).copied())
    }

    pub fn people(&self) -> &People {
        &self.people
    }
}

impl Component for IdentityDetector {
    fn name(&self) -> &'static str {
        "IdentityDetector"
    }

    fn provides(&self) -> Vec<&'static str> {
        vec![DEPENDENCY_AUTHOR, DEPENDENCY_PEOPLE]
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![]
    }

    fn configuration_options(&self) -> Vec<ConfigurationOption> {
        vec![ConfigurationOption {
            name: CONFIG_EXACT_SIGNATURES,
            description: "Treat every distinct name and email pair as its own developer.",
            flag: "exact-signatures",
            kind: OptionKind::Bool,
            default: OptionValue::Bool(false),
        }]
    }

    fn configure(&mut self, options: &Options) -> Result<()> {
        if let Some(exact) = options.bool(CONFIG_EXACT_SIGNATURES)? {
            self.exact = exact;
        }
        Ok(())
    }

    fn initialize(&mut self, ctx: &RunContext<'_>) -> Result<()> {
        self.build(ctx.commits.iter().map(|c| &c.author));
        Ok(())
    }

    fn consume(&mut self, facts: &FactStore) -> Result<Outputs> {
        let commit = facts.commit()?;
        let author = self.lookup(&commit.author).with_context(|| {
            format!(
                "unknown author {} <{}> of {}",
                commit.author.name,
                commit.author.email,
                commit.id.short()
            )
        })?;
        let people: Arc<dyn std::any::Any + Send + Sync> = self.people.clone();
        Ok(Outputs::from([
            (DEPENDENCY_AUTHOR.to_string(), Fact::Int(author as i64)),
            (DEPENDENCY_PEOPLE.to_string(), Fact::Handle(people)),
        ]))
    }

    fn fork(&self, n: usize) -> Vec<Box<dyn Component>> {
        fork_copies(self, n)
    }
}
