// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! File conversions on top of the pool.
//!
//! ```text
//! converter.convert("in.docx").to("out.pdf").execute().await?;
//! ```
//!
//! Formats are checked when the job is submitted, before any worker is
//! involved. The task itself stages the source inside the worker's profile,
//! runs the filter chain and lets the running engine store the result through
//! a client invocation that shares the worker's `UserInstallation`.

use crate::error::OfficeError;
use crate::filter::FilterChain;
use crate::format::{DocumentFamily, DocumentFormat, DocumentFormatRegistry};
use crate::pool::OfficeManagerPool;
use crate::process::{file_url, office_executable};
use crate::task::{OfficeContext, OfficeTask, TaskFuture, TaskHandle};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

pub struct DocumentConverter {
    pool: Arc<OfficeManagerPool>,
    registry: Arc<DocumentFormatRegistry>,
    filter_chain: FilterChain,
}

impl DocumentConverter {
    /// Converter using the registry configured for `pool`.
    pub fn new(pool: Arc<OfficeManagerPool>) -> Result<Self, OfficeError> {
        let config = pool.config();
        let registry = DocumentFormatRegistry::from_config(
            config.document_format_registry.as_deref(),
            &config.format_options,
        )?;
        Ok(Self::with_registry(pool, Arc::new(registry)))
    }

    pub fn with_registry(pool: Arc<OfficeManagerPool>, registry: Arc<DocumentFormatRegistry>) -> Self {
        Self {
            pool,
            registry,
            filter_chain: FilterChain::default(),
        }
    }

    /// Filter chain used by jobs that do not set their own.
    pub fn with_filter_chain(mut self, chain: FilterChain) -> Self {
        self.filter_chain = chain;
        self
    }

    pub fn registry(&self) -> &DocumentFormatRegistry {
        &self.registry
    }

    pub fn convert(&self, source: impl Into<PathBuf>) -> SourceJob<'_> {
        SourceJob {
            converter: self,
            source: source.into(),
            format: None,
        }
    }
}

/// A conversion with its source set.
pub struct SourceJob<'a> {
    converter: &'a DocumentConverter,
    source: PathBuf,
    format: Option<DocumentFormat>,
}

impl<'a> SourceJob<'a> {
    /// Override the format guessed from the source extension.
    pub fn as_format(mut self, format: DocumentFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn to(self, target: impl Into<PathBuf>) -> ConversionJob<'a> {
        ConversionJob {
            converter: self.converter,
            source: self.source,
            source_format: self.format,
            target: target.into(),
            target_format: None,
            filter_chain: None,
        }
    }
}

/// A conversion ready to be submitted.
pub struct ConversionJob<'a> {
    converter: &'a DocumentConverter,
    source: PathBuf,
    source_format: Option<DocumentFormat>,
    target: PathBuf,
    target_format: Option<DocumentFormat>,
    filter_chain: Option<FilterChain>,
}

impl ConversionJob<'_> {
    /// Override the format guessed from the target extension.
    pub fn as_format(mut self, format: DocumentFormat) -> Self {
        self.target_format = Some(format);
        self
    }

    pub fn with_filter_chain(mut self, chain: FilterChain) -> Self {
        self.filter_chain = Some(chain);
        self
    }

    fn resolve(
        &self,
        explicit: &Option<DocumentFormat>,
        path: &Path,
    ) -> Result<DocumentFormat, OfficeError> {
        if let Some(format) = explicit {
            return Ok(format.clone());
        }
        self.converter
            .registry
            .by_path(path)
            .cloned()
            .ok_or_else(|| {
                OfficeError::UnsupportedFormat(format!(
                    "cannot determine format of {}",
                    path.display()
                ))
            })
    }

    /// Validate the job and build the task without submitting it.
    pub fn prepare(self) -> Result<ConversionTask, OfficeError> {
        if !self.source.is_file() {
            return Err(OfficeError::InvalidArgument(format!(
                "source file {} does not exist",
                self.source.display()
            )));
        }
        let source_format = self.resolve(&self.source_format, &self.source)?;
        let target_format = self.resolve(&self.target_format, &self.target)?;
        let family = source_format.input_family.ok_or_else(|| {
            OfficeError::UnsupportedFormat(format!("{} cannot be loaded", source_format.name))
        })?;
        let store_filter = target_format.store_filter(family).ok_or_else(|| {
            OfficeError::UnsupportedFormat(format!(
                "{} documents cannot be stored as {}",
                family, target_format.name
            ))
        })?;
        debug!(
            "prepared conversion {} -> {} ({family}, filter={store_filter})",
            self.source.display(),
            self.target.display()
        );
        let filter_chain = self
            .filter_chain
            .unwrap_or_else(|| self.converter.filter_chain.clone());
        Ok(ConversionTask {
            source: self.source,
            source_format,
            target: self.target,
            target_format,
            family,
            filter_chain,
        })
    }

    pub async fn submit(self) -> Result<TaskHandle, OfficeError> {
        let pool = self.converter.pool.clone();
        let task = self.prepare()?;
        pool.submit(task).await
    }

    pub async fn execute(self) -> Result<(), OfficeError> {
        self.submit().await?.wait().await
    }
}

/// Load, filter and store one document on a worker.
#[derive(Debug)]
pub struct ConversionTask {
    source: PathBuf,
    source_format: DocumentFormat,
    target: PathBuf,
    target_format: DocumentFormat,
    family: DocumentFamily,
    filter_chain: FilterChain,
}

impl ConversionTask {
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// `--convert-to` argument: `<ext>:<FilterName>[:<FilterOptions>]`.
    fn convert_to_arg(&self) -> String {
        let mut arg = self.target_format.extension().to_string();
        if let Some(filter) = self.target_format.store_filter(self.family) {
            arg.push(':');
            arg.push_str(filter);
            if let Some(options) = self.target_format.store_filter_options(self.family) {
                arg.push(':');
                arg.push_str(&options);
            }
        }
        arg
    }

    fn infilter_arg(&self) -> Option<String> {
        let filter = self.source_format.load_filter()?;
        Some(match self.source_format.load_filter_options() {
            Some(options) => format!("--infilter={filter}:{options}"),
            None => format!("--infilter={filter}"),
        })
    }

    async fn run(self, ctx: OfficeContext) -> Result<(), OfficeError> {
        let stage = tempfile::Builder::new()
            .prefix("convert-")
            .tempdir_in(ctx.profile_dir())?;
        let in_dir = stage.path().join("in");
        let out_dir = stage.path().join("out");
        tokio::fs::create_dir_all(&in_dir).await?;
        tokio::fs::create_dir_all(&out_dir).await?;

        // Load.
        let stem = self
            .source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let staged = in_dir.join(format!("{stem}.{}", self.source_format.extension()));
        tokio::fs::copy(&self.source, &staged).await.map_err(|e| {
            OfficeError::execution_with(format!("cannot load {}", self.source.display()), e)
        })?;

        // Filter.
        self.filter_chain.apply(&staged, &ctx)?;

        // Store.
        let mut cmd = Command::new(office_executable(ctx.office_home()));
        cmd.arg(format!("-env:UserInstallation={}", file_url(ctx.profile_dir())))
            .arg("--headless");
        if let Some(infilter) = self.infilter_arg() {
            cmd.arg(infilter);
        }
        cmd.arg("--convert-to")
            .arg(self.convert_to_arg())
            .arg("--outdir")
            .arg(&out_dir)
            .arg(&staged)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            "[office-{}] storing {} as {}",
            ctx.worker(),
            self.source.display(),
            self.convert_to_arg()
        );
        let output = cmd
            .output()
            .await
            .map_err(|e| OfficeError::execution_with("cannot run office client", e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OfficeError::execution(format!(
                "office client exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let produced = out_dir.join(format!("{stem}.{}", self.target_format.extension()));
        if !produced.is_file() {
            return Err(OfficeError::execution(format!(
                "office produced no output for {}",
                self.source.display()
            )));
        }
        if let Some(parent) = self.target.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::rename(&produced, &self.target).await.is_err() {
            // Staging and target may be on different filesystems.
            tokio::fs::copy(&produced, &self.target).await?;
        }
        info!(
            "[office-{}] converted {} -> {}",
            ctx.worker(),
            self.source.display(),
            self.target.display()
        );
        Ok(())
    }
}

impl OfficeTask for ConversionTask {
    fn execute(self: Box<Self>, ctx: OfficeContext) -> TaskFuture {
        Box::pin(self.run(ctx))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::{SLEEPING_ENGINE, fake_office_home, test_config};

    fn converter() -> (DocumentConverter, tempfile::TempDir, tempfile::TempDir) {
        let home = fake_office_home(SLEEPING_ENGINE);
        let work = tempfile::tempdir().unwrap();
        let mut config = test_config(work.path(), &[2002]);
        config.office_home = Some(home.path().to_path_buf());
        let pool = Arc::new(OfficeManagerPool::new(config).unwrap());
        (DocumentConverter::new(pool).unwrap(), home, work)
    }

    #[test]
    fn test_prepare_resolves_formats() {
        let (converter, _home, work) = converter();
        let source = work.path().join("report.DOCX");
        std::fs::write(&source, "content").unwrap();

        let task = converter
            .convert(&source)
            .to(work.path().join("report.pdf"))
            .prepare()
            .unwrap();
        assert_eq!(task.family, DocumentFamily::Text);
        assert_eq!(task.convert_to_arg(), "pdf:writer_pdf_Export");
        assert_eq!(task.infilter_arg(), None);
        assert_eq!(task.source(), source.as_path());
    }

    #[test]
    fn test_prepare_with_filter_options() {
        let (converter, _home, work) = converter();
        let source = work.path().join("data.csv");
        std::fs::write(&source, "a,b").unwrap();

        let task = converter
            .convert(&source)
            .to(work.path().join("data.txt"))
            .as_format(converter.registry().by_extension("csv").unwrap().clone())
            .prepare()
            .unwrap();
        assert_eq!(task.family, DocumentFamily::Spreadsheet);
        assert_eq!(
            task.convert_to_arg(),
            "csv:Text - txt - csv (StarCalc):44,34,0"
        );
        assert_eq!(
            task.infilter_arg().as_deref(),
            Some("--infilter=Text - txt - csv (StarCalc):44,34,0")
        );
    }

    #[test]
    fn test_unknown_extension_is_unsupported() {
        let (converter, _home, work) = converter();
        let source = work.path().join("notes.docx");
        std::fs::write(&source, "content").unwrap();

        let err = converter
            .convert(&source)
            .to(work.path().join("notes.xyz"))
            .prepare()
            .unwrap_err();
        assert!(matches!(err, OfficeError::UnsupportedFormat(_)), "{err}");
    }

    #[test]
    fn test_output_only_source_is_unsupported() {
        let (converter, _home, work) = converter();
        let source = work.path().join("scan.pdf");
        std::fs::write(&source, "%PDF").unwrap();

        let err = converter
            .convert(&source)
            .to(work.path().join("scan.docx"))
            .prepare()
            .unwrap_err();
        assert!(matches!(err, OfficeError::UnsupportedFormat(_)), "{err}");
    }

    #[test]
    fn test_family_mismatch_is_unsupported() {
        let (converter, _home, work) = converter();
        let source = work.path().join("sheet.xlsx");
        std::fs::write(&source, "cells").unwrap();

        let err = converter
            .convert(&source)
            .to(work.path().join("sheet.docx"))
            .prepare()
            .unwrap_err();
        assert!(matches!(err, OfficeError::UnsupportedFormat(_)), "{err}");
    }

    #[test]
    fn test_missing_source_is_invalid() {
        let (converter, _home, work) = converter();
        let err = converter
            .convert(work.path().join("missing.docx"))
            .to(work.path().join("missing.pdf"))
            .prepare()
            .unwrap_err();
        assert!(matches!(err, OfficeError::InvalidArgument(_)), "{err}");
    }

    #[tokio::test]
    async fn test_unsupported_format_fails_before_submission() {
        // The pool is never started, so reaching it would be IllegalState.
        let (converter, _home, work) = converter();
        let source = work.path().join("notes.docx");
        std::fs::write(&source, "content").unwrap();

        let err = converter
            .convert(&source)
            .to(work.path().join("notes.xyz"))
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(err, OfficeError::UnsupportedFormat(_)), "{err}");
    }
}
