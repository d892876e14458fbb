//! Synthesis of disposable notebooks.
//!
//! Every test gets its own `.ipynb` in the server's working directory: a deep
//! copy of a shared template, one setup cell that loads the fixture data, and
//! the test's own code cells in order. The template is process-wide and is
//! never mutated; `NotebookSynthesizer::build` always works on an owned clone.

use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Extension of generated notebook files.
pub const NOTEBOOK_EXTENSION: &str = "ipynb";

/// Characters that may not survive into a notebook filename.
const REPLACED_CHARS: [char; 5] = [' ', '.', '\'', '/', '\\'];

static EMBEDDED_TEMPLATE: Lazy<Arc<Notebook>> = Lazy::new(|| {
    let metadata = json!({
        "kernelspec": {
            "display_name": "Python 3",
            "language": "python",
            "name": "python3"
        },
        "language_info": {
            "codemirror_mode": { "name": "ipython", "version": 3 },
            "file_extension": ".py",
            "mimetype": "text/x-python",
            "name": "python",
            "nbconvert_exporter": "python",
            "pygments_lexer": "ipython3"
        }
    });

    Arc::new(Notebook {
        cells: Vec::new(),
        metadata: match metadata {
            Value::Object(map) => map,
            _ => Map::new(),
        },
        nbformat: 4,
        nbformat_minor: 4,
        extra: Map::new(),
    })
});

/// A notebook document in the nbformat 4 interchange shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub nbformat: u32,
    pub nbformat_minor: u32,
    /// Top-level keys the harness does not interpret, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One code cell. Identity is its index in `Notebook::cells`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub cell_type: String,
    pub execution_count: Option<u32>,
    pub metadata: Map<String, Value>,
    pub outputs: Vec<Value>,
    pub source: Vec<String>,
}

impl Cell {
    /// A fresh, never-executed code cell.
    pub fn code<I, S>(source: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cell_type: "code".to_string(),
            execution_count: None,
            metadata: Map::new(),
            outputs: Vec::new(),
            source: source.into_iter().map(Into::into).collect(),
        }
    }
}

/// Shared, immutable reference notebook.
#[derive(Debug, Clone)]
pub struct NotebookTemplate {
    document: Arc<Notebook>,
}

impl NotebookTemplate {
    /// The built-in Python 3 template.
    #[must_use]
    pub fn embedded() -> Self {
        Self {
            document: Arc::clone(&EMBEDDED_TEMPLATE),
        }
    }

    /// Reads a template from disk. Any cells it carries are discarded by
    /// generation, which always starts from the setup cell.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Template` if the file is unreadable or not a
    /// notebook.
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| HarnessError::Template {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let document: Notebook =
            serde_json::from_str(&content).map_err(|e| HarnessError::Template {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            document: Arc::new(document),
        })
    }

    /// Borrow the template document.
    #[must_use]
    pub fn document(&self) -> &Notebook {
        &self.document
    }

    /// An owned deep copy, structurally independent of the template.
    #[must_use]
    pub fn instantiate(&self) -> Notebook {
        Notebook::clone(&self.document)
    }
}

impl Default for NotebookTemplate {
    fn default() -> Self {
        Self::embedded()
    }
}

/// Replaces characters that cannot appear in a notebook filename.
///
/// Deterministic and idempotent.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if REPLACED_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// `<sanitized-name>.ipynb`, or an error if `name` is blank.
///
/// # Errors
///
/// Returns `HarnessError::InvalidNotebookName` for empty or whitespace-only names.
pub fn notebook_filename(name: &str) -> HarnessResult<String> {
    if name.trim().is_empty() || name.contains('\0') {
        return Err(HarnessError::InvalidNotebookName(name.to_string()));
    }
    Ok(format!("{}.{NOTEBOOK_EXTENSION}", sanitize_name(name)))
}

/// Builds notebooks from the template and writes them to the server directory.
#[derive(Debug, Clone)]
pub struct NotebookSynthesizer {
    template: NotebookTemplate,
    setup_source: Vec<String>,
    output_dir: PathBuf,
}

impl NotebookSynthesizer {
    /// Creates a synthesizer with the default setup cell.
    pub fn new(template: NotebookTemplate, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            template,
            setup_source: HarnessConfig::default().setup_source,
            output_dir: output_dir.into(),
        }
    }

    /// Creates a synthesizer from configuration, loading the template file
    /// if one is configured.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Template` if the configured template is invalid.
    pub fn from_config(config: &HarnessConfig) -> HarnessResult<Self> {
        let template = match &config.template_path {
            Some(path) => NotebookTemplate::from_file(path)?,
            None => NotebookTemplate::embedded(),
        };
        Ok(Self::new(template, &config.notebook_dir).with_setup_source(config.setup_source.clone()))
    }

    /// Replaces the setup cell source.
    #[must_use]
    pub fn with_setup_source(mut self, source: Vec<String>) -> Self {
        self.setup_source = source;
        self
    }

    /// The template generation starts from.
    #[must_use]
    pub fn template(&self) -> &NotebookTemplate {
        &self.template
    }

    /// Directory generated notebooks are written to.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Builds the notebook in memory: setup cell first, then one cell per
    /// entry of `cells` in order.
    pub fn build<C, L>(&self, cells: C) -> Notebook
    where
        C: IntoIterator<Item = L>,
        L: IntoIterator,
        L::Item: Into<String>,
    {
        let mut notebook = self.template.instantiate();
        notebook.cells = std::iter::once(Cell::code(self.setup_source.iter().cloned()))
            .chain(cells.into_iter().map(Cell::code))
            .collect();
        notebook
    }

    /// Path `generate` writes to for `name`.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::InvalidNotebookName` for blank names.
    pub fn notebook_path(&self, name: &str) -> HarnessResult<PathBuf> {
        Ok(self.output_dir.join(notebook_filename(name)?))
    }

    /// Builds and writes the notebook for test `name`, overwriting any
    /// previous file of the same name.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Synthesis` if the output directory cannot be
    /// created or the file cannot be written.
    pub fn generate<C, L>(&self, name: &str, cells: C) -> HarnessResult<PathBuf>
    where
        C: IntoIterator<Item = L>,
        L: IntoIterator,
        L::Item: Into<String>,
    {
        let path = self.notebook_path(name)?;
        let notebook = self.build(cells);
        let bytes = serde_json::to_vec(&notebook)?;

        std::fs::create_dir_all(&self.output_dir).map_err(|source| HarnessError::Synthesis {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, bytes).map_err(|source| HarnessError::Synthesis {
            path: path.clone(),
            source,
        })?;

        debug!(
            "generated {} with {} cells",
            path.display(),
            notebook.cells.len()
        );
        Ok(path)
    }
}
