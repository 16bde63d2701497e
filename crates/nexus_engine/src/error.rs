//! Error types for a build pass.
//!
//! Per-module failures are collected while a pass runs and surfaced together
//! as one [`BuildError`].

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::graph::ModuleId;

/// A specifier that no candidate path satisfied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot resolve '{specifier}' from {}", .from.display())]
pub struct ResolutionError {
    pub specifier: String,
    pub from: PathBuf,
    /// Every candidate path that was checked, in order.
    pub searched: Vec<PathBuf>,
}

/// A loader rule rejected a module.
#[derive(Error, Debug)]
#[error("transform '{rule}' failed for {module}: {cause:#}")]
pub struct TransformError {
    pub module: ModuleId,
    pub rule: String,
    pub cause: anyhow::Error,
}

/// The configured traversal depth guard tripped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("module {module} discovered at depth {depth}, limit is {limit}")]
pub struct CycleLimitError {
    pub module: ModuleId,
    pub depth: usize,
    pub limit: usize,
}

/// An output template or chunk could not be rendered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmitError {
    #[error("unknown placeholder '{placeholder}' in template '{template}'")]
    UnknownPlaceholder {
        template: String,
        placeholder: String,
    },

    #[error("chunks '{first}' and '{second}' both emit to '{file}'")]
    FileConflict {
        file: String,
        first: String,
        second: String,
    },
}

/// One failure recorded during a pass.
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    CycleLimit(#[from] CycleLimitError),

    #[error(transparent)]
    Emit(#[from] EmitError),
}

/// Aggregate failure of a single build pass.
#[derive(Debug, Default)]
pub struct BuildError {
    pub errors: Vec<ModuleError>,
}

impl BuildError {
    pub fn new(errors: Vec<ModuleError>) -> Self {
        Self { errors }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn resolution_errors(&self) -> impl Iterator<Item = &ResolutionError> {
        self.errors.iter().filter_map(|e| match e {
            ModuleError::Resolution(err) => Some(err),
            _ => None,
        })
    }

    pub fn transform_errors(&self) -> impl Iterator<Item = &TransformError> {
        self.errors.iter().filter_map(|e| match e {
            ModuleError::Transform(err) => Some(err),
            _ => None,
        })
    }
}

impl From<EmitError> for BuildError {
    fn from(err: EmitError) -> Self {
        Self::new(vec![ModuleError::Emit(err)])
    }
}

impl std::error::Error for BuildError {}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            0 => write!(f, "build failed"),
            1 => write!(f, "build failed with 1 error:"),
            n => write!(f, "build failed with {n} errors:"),
        }?;
        for err in &self.errors {
            write!(f, "\n  - {err}")?;
        }
        Ok(())
    }
}
