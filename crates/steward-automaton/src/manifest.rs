//! Manifest
//!
//! YAML description of the state graph:
//!
//! ```yaml
//! initial: idle
//! states:
//!   - tag: idle
//!     shell: "true"
//!     next: [run]
//!   - tag: run
//!     shell: "sleep 5; echo done"
//!     next: ["*"]
//! ```
//!
//! `next` holds glob patterns of the states reachable from a state; omitting
//! it makes the state a dead end.

use globset::{Glob, GlobMatcher};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Tag reported before the first transition.
pub const BOOTSTRAP: &str = "idle";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("cannot read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot load the YAML manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("manifest declares no state")]
    NoStates,

    #[error("state with an empty tag")]
    EmptyTag,

    #[error("state {0} is declared twice")]
    DuplicateTag(String),

    #[error("state {tag}: invalid pattern {pattern:?}: {source}")]
    Pattern {
        tag: String,
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateSpec {
    pub tag: String,
    pub shell: String,
    #[serde(default)]
    pub next: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub initial: String,
    pub states: Vec<StateSpec>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ManifestError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Check the tags and compile the patterns into a [`Graph`].
    pub fn validate(&self) -> Result<Graph, ManifestError> {
        if self.states.is_empty() {
            return Err(ManifestError::NoStates);
        }

        let mut states = Vec::with_capacity(self.states.len());
        let mut index = HashMap::new();
        for spec in &self.states {
            if spec.tag.trim().is_empty() {
                return Err(ManifestError::EmptyTag);
            }
            if index.insert(spec.tag.clone(), states.len()).is_some() {
                return Err(ManifestError::DuplicateTag(spec.tag.clone()));
            }
            states.push(StateNode::compile(spec)?);
        }

        let bootstrap = StateNode::compile(&StateSpec {
            tag: BOOTSTRAP.to_string(),
            shell: String::new(),
            next: vec!["*".to_string()],
        })?;

        Ok(Graph {
            initial: self.initial.clone(),
            states,
            index,
            bootstrap,
        })
    }
}

/// One state with its compiled outbound patterns.
#[derive(Debug, Clone)]
pub struct StateNode {
    pub tag: String,
    pub shell: String,
    pub next: Vec<String>,
    matchers: Vec<GlobMatcher>,
}

impl StateNode {
    fn compile(spec: &StateSpec) -> Result<Self, ManifestError> {
        let matchers = spec
            .next
            .iter()
            .map(|pattern| {
                Glob::new(pattern)
                    .map(|glob| glob.compile_matcher())
                    .map_err(|source| ManifestError::Pattern {
                        tag: spec.tag.clone(),
                        pattern: pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            tag: spec.tag.clone(),
            shell: spec.shell.clone(),
            next: spec.next.clone(),
            matchers,
        })
    }

    /// First outbound pattern matching `target`, in declaration order.
    pub fn matching_pattern(&self, target: &str) -> Option<&str> {
        self.matchers
            .iter()
            .position(|matcher| matcher.is_match(target))
            .map(|i| self.next[i].as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("unknown state {0:?}")]
    UnknownState(String),

    #[error("{from} -> {to} is not allowed")]
    NotAllowed { from: String, to: String },
}

/// Validated state graph. States are addressed by their declaration index.
#[derive(Debug, Clone)]
pub struct Graph {
    initial: String,
    states: Vec<StateNode>,
    index: HashMap<String, usize>,
    bootstrap: StateNode,
}

impl Graph {
    pub fn initial(&self) -> &str {
        &self.initial
    }

    pub fn states(&self) -> &[StateNode] {
        &self.states
    }

    /// The state at `current`, or the bootstrap pseudo-state for `None`.
    pub fn node(&self, current: Option<usize>) -> &StateNode {
        current
            .and_then(|i| self.states.get(i))
            .unwrap_or(&self.bootstrap)
    }

    pub fn lookup(&self, tag: &str) -> Option<usize> {
        self.index.get(tag).copied()
    }

    /// Resolve a transition request from `current` to `target`.
    pub fn allows(&self, current: Option<usize>, target: &str) -> Result<usize, Rejection> {
        let to = self
            .lookup(target)
            .ok_or_else(|| Rejection::UnknownState(target.to_string()))?;
        let from = self.node(current);
        match from.matching_pattern(target) {
            Some(_) => Ok(to),
            None => Err(Rejection::NotAllowed {
                from: from.tag.clone(),
                to: target.to_string(),
            }),
        }
    }
}
