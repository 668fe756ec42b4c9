// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Document formats known to the converter and the engine filters used to
//! load and store them.

use crate::error::OfficeError;
use log::{debug, error, warn};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

const BUILTIN_FORMATS: &str = include_str!("../resources/document-formats.json");

static BUILTIN: OnceLock<DocumentFormatRegistry> = OnceLock::new();

pub type PropertyMap = Map<String, Value>;

const FILTER_NAME: &str = "FilterName";
const FILTER_OPTIONS: &str = "FilterOptions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentFamily {
    Text,
    Spreadsheet,
    Presentation,
    Drawing,
}

impl fmt::Display for DocumentFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentFamily::Text => write!(f, "TEXT"),
            DocumentFamily::Spreadsheet => write!(f, "SPREADSHEET"),
            DocumentFamily::Presentation => write!(f, "PRESENTATION"),
            DocumentFamily::Drawing => write!(f, "DRAWING"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFormat {
    pub name: String,
    pub extensions: Vec<String>,
    pub media_type: String,
    /// Family of documents in this format; `None` for output-only formats.
    #[serde(default)]
    pub input_family: Option<DocumentFamily>,
    #[serde(default)]
    pub load_properties: PropertyMap,
    #[serde(default)]
    pub store_properties: HashMap<DocumentFamily, PropertyMap>,
}

impl DocumentFormat {
    /// Primary extension, used for output file names.
    pub fn extension(&self) -> &str {
        self.extensions.first().map(String::as_str).unwrap_or("")
    }

    pub fn store_filter(&self, family: DocumentFamily) -> Option<&str> {
        self.store_properties
            .get(&family)?
            .get(FILTER_NAME)?
            .as_str()
    }

    pub fn store_filter_options(&self, family: DocumentFamily) -> Option<String> {
        self.store_properties
            .get(&family)?
            .get(FILTER_OPTIONS)
            .and_then(property_string)
    }

    pub fn load_filter(&self) -> Option<&str> {
        self.load_properties.get(FILTER_NAME)?.as_str()
    }

    pub fn load_filter_options(&self) -> Option<String> {
        self.load_properties
            .get(FILTER_OPTIONS)
            .and_then(property_string)
    }

    /// Copy of this format with `options` layered over its properties.
    pub fn with_options(&self, options: &FormatOptions) -> DocumentFormat {
        let mut format = self.clone();
        format
            .load_properties
            .extend(options.load_properties.clone());
        for (family, props) in &options.store_properties {
            format
                .store_properties
                .entry(*family)
                .or_default()
                .extend(props.clone());
        }
        format
    }
}

fn property_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Per-format property overrides, keyed by extension in the configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FormatOptions {
    #[serde(default)]
    pub load_properties: PropertyMap,
    #[serde(default)]
    pub store_properties: HashMap<DocumentFamily, PropertyMap>,
}

/// Immutable lookup of formats by extension and media type.
#[derive(Debug, Clone, Default)]
pub struct DocumentFormatRegistry {
    formats: Vec<DocumentFormat>,
    by_extension: HashMap<String, usize>,
    by_media_type: HashMap<String, usize>,
}

impl DocumentFormatRegistry {
    pub fn from_json(json: &str) -> Result<Self, OfficeError> {
        let formats: Vec<DocumentFormat> = serde_json::from_str(json)
            .map_err(|e| OfficeError::Config(format!("invalid document format registry: {e}")))?;
        Ok(Self::from_formats(formats))
    }

    pub fn load(path: &Path) -> Result<Self, OfficeError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            OfficeError::Config(format!("reading {}: {e}", path.display()))
        })?;
        let registry = Self::from_json(&json)?;
        debug!(
            "loaded {} document format(s) from {}",
            registry.formats.len(),
            path.display()
        );
        Ok(registry)
    }

    pub fn from_formats(formats: Vec<DocumentFormat>) -> Self {
        let mut registry = Self::default();
        for format in formats {
            registry.insert(format);
        }
        registry
    }

    /// Formats shipped with the crate.
    pub fn builtin() -> &'static DocumentFormatRegistry {
        BUILTIN.get_or_init(|| {
            Self::from_json(BUILTIN_FORMATS).unwrap_or_else(|e| {
                error!("built-in document formats are unusable: {e}");
                Self::default()
            })
        })
    }

    /// Registry from an optional custom file, with per-extension overrides.
    pub fn from_config(
        path: Option<&Path>,
        options: &HashMap<String, FormatOptions>,
    ) -> Result<Self, OfficeError> {
        let mut registry = match path {
            Some(path) => Self::load(path)?,
            None => Self::builtin().clone(),
        };
        for (ext, opts) in options {
            match registry.by_extension.get(&ext.to_lowercase()) {
                Some(&idx) => {
                    let format = registry.formats[idx].with_options(opts);
                    registry.formats[idx] = format;
                }
                None => warn!("format options given for unknown extension {ext}"),
            }
        }
        Ok(registry)
    }

    fn insert(&mut self, format: DocumentFormat) {
        let idx = self.formats.len();
        for ext in &format.extensions {
            self.by_extension.insert(ext.to_lowercase(), idx);
        }
        self.by_media_type
            .insert(format.media_type.to_lowercase(), idx);
        self.formats.push(format);
    }

    /// Case-insensitive; a leading dot is ignored.
    pub fn by_extension(&self, ext: &str) -> Option<&DocumentFormat> {
        let ext = ext.trim_start_matches('.').to_lowercase();
        self.by_extension.get(&ext).map(|&i| &self.formats[i])
    }

    pub fn by_media_type(&self, media_type: &str) -> Option<&DocumentFormat> {
        self.by_media_type
            .get(&media_type.to_lowercase())
            .map(|&i| &self.formats[i])
    }

    /// Format of `path` according to its extension.
    pub fn by_path(&self, path: &Path) -> Option<&DocumentFormat> {
        self.by_extension(path.extension()?.to_str()?)
    }

    /// Formats a document of `family` can be stored as.
    pub fn output_formats(&self, family: DocumentFamily) -> Vec<&DocumentFormat> {
        self.formats
            .iter()
            .filter(|f| f.store_properties.contains_key(&family))
            .collect()
    }

    pub fn formats(&self) -> &[DocumentFormat] {
        &self.formats
    }
}
