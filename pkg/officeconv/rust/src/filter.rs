// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::OfficeError;
use crate::task::OfficeContext;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Step applied to a loaded document before it is stored.
///
/// `document` is the worker's private staged copy of the source and may be
/// modified in place.
pub trait Filter: Send + Sync + fmt::Debug {
    fn apply(&self, document: &Path, ctx: &OfficeContext) -> Result<(), OfficeError>;
}

/// Ordered filters. Cloning shares the filters.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run every filter in order, stopping at the first failure.
    pub fn apply(&self, document: &Path, ctx: &OfficeContext) -> Result<(), OfficeError> {
        for filter in &self.filters {
            filter.apply(document, ctx).map_err(|e| match e {
                OfficeError::ExecutionFailure { .. } => e,
                e => OfficeError::execution_with(format!("filter {filter:?} failed"), e),
            })?;
        }
        Ok(())
    }
}
