//! Loading resource manifests from YAML files.
//!
//! A manifest directory holds `*.yaml` / `*.yml` files, each with one or more
//! `---` separated documents. Every document names its `kind`; documents
//! that fail to parse or validate are reported individually and never stop
//! the rest from loading.

use std::fmt;
use std::path::{Path, PathBuf};

use pd_operator_core::{
    API_VERSION, BusinessService, BusinessServiceSpec, EscalationPolicy, EscalationPolicySpec,
    ObjectKey, PagerdutyService, PagerdutyServiceSpec, ResourceSpec,
};
use serde::Deserialize;
use serde_yaml::Value;
use thiserror::Error;

/// Why a manifest or document could not be loaded.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("document has no kind")]
    MissingKind,

    #[error(transparent)]
    Invalid(#[from] pd_operator_core::Error),

    #[error("unsupported apiVersion '{0}'")]
    ApiVersion(String),
}

/// One parsed resource of any managed kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    EscalationPolicy(EscalationPolicy),
    Service(PagerdutyService),
    BusinessService(BusinessService),
}

impl Manifest {
    /// Parse one YAML document, dispatching on its `kind`.
    ///
    /// # Errors
    ///
    /// Fails on an unknown or missing kind, a foreign `apiVersion`, a shape
    /// mismatch or a spec that does not validate.
    pub fn from_value(value: Value) -> Result<Self, ManifestError> {
        if let Some(version) = value
            .get("apiVersion")
            .and_then(Value::as_str)
            .filter(|v| *v != API_VERSION)
        {
            return Err(ManifestError::ApiVersion(version.to_string()));
        }
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ManifestError::MissingKind)?;

        let manifest = match kind.as_str() {
            EscalationPolicySpec::KIND => Self::EscalationPolicy(serde_yaml::from_value(value)?),
            PagerdutyServiceSpec::KIND => Self::Service(serde_yaml::from_value(value)?),
            BusinessServiceSpec::KIND => Self::BusinessService(serde_yaml::from_value(value)?),
            other => return Err(pd_operator_core::Error::unknown_kind(other).into()),
        };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Kind name.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::EscalationPolicy(_) => EscalationPolicySpec::KIND,
            Self::Service(_) => PagerdutyServiceSpec::KIND,
            Self::BusinessService(_) => BusinessServiceSpec::KIND,
        }
    }

    /// Store key.
    pub fn key(&self) -> ObjectKey {
        match self {
            Self::EscalationPolicy(r) => r.key(),
            Self::Service(r) => r.key(),
            Self::BusinessService(r) => r.key(),
        }
    }

    /// Validate the spec.
    ///
    /// # Errors
    ///
    /// Returns the first invalid or missing field.
    pub fn validate(&self) -> pd_operator_core::Result<()> {
        match self {
            Self::EscalationPolicy(r) => r.validate(),
            Self::Service(r) => r.validate(),
            Self::BusinessService(r) => r.validate(),
        }
    }
}

/// A document together with where it came from.
#[derive(Debug)]
pub struct Document {
    pub source: PathBuf,
    /// Zero-based position within the file.
    pub index: usize,
    pub manifest: Result<Manifest, ManifestError>,
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source.display(), self.index)
    }
}

/// Split `text` into documents and parse each.
///
/// Empty documents are skipped. A syntax error ends the file, since the
/// parser cannot resynchronise past it.
pub fn parse_documents(source: &Path, text: &str) -> Vec<Document> {
    let mut documents = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let manifest = match Value::deserialize(document) {
            Ok(Value::Null) => continue,
            Ok(value) => Manifest::from_value(value),
            Err(e) => {
                documents.push(Document {
                    source: source.to_path_buf(),
                    index,
                    manifest: Err(e.into()),
                });
                break;
            }
        };
        documents.push(Document {
            source: source.to_path_buf(),
            index,
            manifest,
        });
    }
    documents
}

/// Parse every YAML file directly inside `dir`, in path order.
///
/// # Errors
///
/// Fails when the directory or one of its files cannot be read.
pub fn load_dir(dir: &Path) -> Result<Vec<Document>, ManifestError> {
    let io_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ManifestError::Io { path, source }
    };

    let mut files = std::fs::read_dir(dir)
        .map_err(io_error(dir))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_error(dir))?;
    files.retain(|path| path.is_file() && is_yaml(path));
    files.sort();

    let mut documents = Vec::new();
    for path in files {
        let text = std::fs::read_to_string(&path).map_err(io_error(&path))?;
        documents.extend(parse_documents(&path, &text));
    }
    Ok(documents)
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext, "yaml" | "yml"))
}
