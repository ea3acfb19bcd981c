//! Imports declared by changed files
//!
//! Extraction runs on a bounded worker pool:
//!
//! ```text
//! consume ─► bounded(workers) ─► N workers ─► Mutex<ImportMap>
//!               (changed files)    (tree-sitter parse)
//! ```
//!
//! The pool is joined before `consume` returns. Files over the size limit,
//! files that are not UTF-8, files that fail to parse and files in languages
//! without a grammar are skipped.

use super::blob_cache::{BlobMap, CachedBlob};
use super::tree_diff::{Change, ChangeAction};
use super::{
    DEPENDENCY_BLOB_CACHE, DEPENDENCY_IMPORTS, DEPENDENCY_TREE_CHANGES, FEATURE_CODE_STRUCTURE,
};
use crate::core::{
    fork_copies, Component, ConfigurationOption, Fact, FactStore, OptionKind, OptionValue,
    Options, Outputs, RunContext,
};
use anyhow::Result;
use crate::parsers::{Language, SourceFile};
use crossbeam_channel::bounded;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tracing::{debug, warn};

pub const CONFIG_WORKERS: &str = "Imports.Workers";
pub const CONFIG_MAX_FILE_SIZE: &str = "Imports.MaxFileSize";
pub const DEFAULT_MAX_FILE_SIZE: i64 = 1 << 20;

/// Imports of one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileImports {
    pub language: String,
    pub imports: Vec<String>,
}

/// Path → imports of the files changed by the commit
pub type ImportMap = BTreeMap<String, FileImports>;

struct Job {
    path: String,
    language: Language,
    blob: Arc<CachedBlob>,
}

fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Upper bound on `Imports.Workers`; threads are spawned per commit
fn max_workers() -> usize {
    default_workers() * 4
}

/// Imports of one blob
fn scan(language: Language, source: &str) -> anyhow::Result<Vec<String>> {
    SourceFile::parse(language, source)?.imports()
}

#[derive(Clone)]
pub struct Imports {
    workers: usize,
    max_file_size: usize,
}

impl Default for Imports {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_file_size: DEFAULT_MAX_FILE_SIZE as usize,
        }
    }
}

impl Imports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan every job on the worker pool; returns once all workers are joined
    fn extract_all(&self, jobs: Vec<Job>, commit: &str) -> ImportMap {
        let results = Mutex::new(ImportMap::new());
        let (job_tx, job_rx) = bounded::<Job>(self.workers);
        let max_file_size = self.max_file_size;

        thread::scope(|scope| {
            for _ in 0..self.workers {
                let rx = job_rx.clone();
                let results = &results;
                scope.spawn(move || {
                    for job in rx {
                        if job.blob.size() > max_file_size {
                            warn!(
                                "Imports: skipped {} in {}: size is too big: {} > {}",
                                job.path,
                                commit,
                                job.blob.size(),
                                max_file_size
                            );
                            continue;
                        }
                        let Ok(source) = std::str::from_utf8(&job.blob.data) else {
                            warn!("Imports: skipped {} in {}: not valid UTF-8", job.path, commit);
                            continue;
                        };
                        let imports = match scan(job.language, source) {
                            Ok(imports) => imports,
                            Err(e) => {
                                warn!("Imports: skipped {} in {}: {:#}", job.path, commit, e);
                                continue;
                            }
                        };
                        let file = FileImports {
                            language: job.language.as_str().to_string(),
                            imports,
                        };
                        results
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(job.path, file);
                    }
                });
            }
            drop(job_rx);

            for job in jobs {
                if job_tx.send(job).is_err() {
                    break;
                }
            }
            drop(job_tx);
        });

        results.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Component for Imports {
    fn name(&self) -> &'static str {
        "Imports"
    }

    fn provides(&self) -> Vec<&'static str> {
        vec![DEPENDENCY_IMPORTS]
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![DEPENDENCY_TREE_CHANGES, DEPENDENCY_BLOB_CACHE]
    }

    fn features(&self) -> Vec<&'static str> {
        vec![FEATURE_CODE_STRUCTURE]
    }

    fn configuration_options(&self) -> Vec<ConfigurationOption> {
        vec![
            ConfigurationOption {
                name: CONFIG_WORKERS,
                description: "Number of threads extracting imports in parallel.",
                flag: "import-workers",
                kind: OptionKind::Int,
                default: OptionValue::Int(default_workers() as i64),
            },
            ConfigurationOption {
                name: CONFIG_MAX_FILE_SIZE,
                description: "Files larger than this many bytes are ignored.",
                flag: "import-max-file-size",
                kind: OptionKind::Int,
                default: OptionValue::Int(DEFAULT_MAX_FILE_SIZE),
            },
        ]
    }

    fn configure(&mut self, options: &Options) -> Result<()> {
        if let Some(workers) = options.int(CONFIG_WORKERS)? {
            self.workers = if workers < 1 {
                warn!(
                    "invalid number of import workers: {}. Set to {}.",
                    workers,
                    default_workers()
                );
                default_workers()
            } else if workers as u64 > max_workers() as u64 {
                warn!(
                    "too many import workers: {}. Set to {}.",
                    workers,
                    max_workers()
                );
                max_workers()
            } else {
                workers as usize
            };
        }
        if let Some(size) = options.int(CONFIG_MAX_FILE_SIZE)? {
            self.max_file_size = if size <= 0 {
                warn!(
                    "invalid maximum file size: {}. Set to {}.",
                    size, DEFAULT_MAX_FILE_SIZE
                );
                DEFAULT_MAX_FILE_SIZE as usize
            } else {
                size as usize
            };
        }
        Ok(())
    }

    fn initialize(&mut self, _ctx: &RunContext<'_>) -> Result<()> {
        Ok(())
    }

    fn consume(&mut self, facts: &FactStore) -> Result<Outputs> {
        let commit = facts.commit()?.id.short().to_string();
        let changes = facts.handle::<Vec<Change>>(DEPENDENCY_TREE_CHANGES)?;
        let cache = facts.handle::<BlobMap>(DEPENDENCY_BLOB_CACHE)?;

        let mut jobs = Vec::new();
        for change in changes {
            if change.action() == ChangeAction::Delete {
                continue;
            }
            let Some(to) = &change.to else {
                continue;
            };
            let Some(language) = Language::detect(&to.path) else {
                continue;
            };
            match cache.get(&to.blob) {
                Some(blob) => jobs.push(Job {
                    path: to.path.clone(),
                    language,
                    blob: Arc::clone(blob),
                }),
                None => debug!("Imports: no contents for {} in {}", to.path, commit),
            }
        }

        let imports = if jobs.is_empty() {
            ImportMap::new()
        } else {
            self.extract_all(jobs, &commit)
        };
        Ok(Outputs::from([(
            DEPENDENCY_IMPORTS.to_string(),
            Fact::handle(imports),
        )]))
    }

    fn fork(&self, n: usize) -> Vec<Box<dyn Component>> {
        fork_copies(self, n)
    }
}
