//! Target definitions as produced by a definitions parser.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Leading character that marks a dependency as a fact.
pub const FACT_SIGIL: char = '$';

/// A declared dependency, classified once at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyRef {
    /// A fact, named with its sigil (e.g. `$audio_state`)
    Fact(String),
    /// Another target
    Target(String),
}

impl DependencyRef {
    /// Classify a raw dependency name by its sigil.
    pub fn parse(name: &str) -> Self {
        if name.starts_with(FACT_SIGIL) {
            DependencyRef::Fact(name.to_string())
        } else {
            DependencyRef::Target(name.to_string())
        }
    }

    /// The name as declared.
    pub fn name(&self) -> &str {
        match self {
            DependencyRef::Fact(n) | DependencyRef::Target(n) => n,
        }
    }

    /// Whether this refers to a fact.
    pub fn is_fact(&self) -> bool {
        matches!(self, DependencyRef::Fact(_))
    }
}

impl std::fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Update script attached to a target definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSpec {
    /// Interpreter name, or `default`
    #[serde(rename = "type", default = "default_script_type")]
    pub script_type: String,

    /// Script source text
    pub source: String,
}

fn default_script_type() -> String {
    "default".to_string()
}

impl ScriptSpec {
    /// Create a script spec.
    pub fn new(script_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            script_type: script_type.into(),
            source: source.into(),
        }
    }
}

/// A single parsed target record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDef {
    /// Target name
    pub name: String,

    /// Dependency names in declaration order
    #[serde(default)]
    pub depends: Vec<String>,

    /// Update script, if any
    #[serde(default)]
    pub script: Option<ScriptSpec>,
}

impl TargetDef {
    /// Create a definition without a script.
    pub fn new<I, S>(name: impl Into<String>, depends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            depends: depends.into_iter().map(Into::into).collect(),
            script: None,
        }
    }

    /// Attach an update script.
    pub fn with_script(
        mut self,
        script_type: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        self.script = Some(ScriptSpec::new(script_type, source));
        self
    }

    /// Classified dependencies.
    pub fn dependency_refs(&self) -> Vec<DependencyRef> {
        self.depends.iter().map(|d| DependencyRef::parse(d)).collect()
    }
}

/// Resolver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Interpreter the `default` script type resolves to
    #[serde(default = "default_interpreter")]
    pub default_interpreter: String,

    /// Name of the synthesized auto-update target, if enabled
    #[serde(default)]
    pub auto_update: Option<String>,
}

fn default_interpreter() -> String {
    "simple".to_string()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            default_interpreter: default_interpreter(),
            auto_update: None,
        }
    }
}

/// A complete definitions document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definitions {
    /// Target records in declaration order
    #[serde(default)]
    pub targets: Vec<TargetDef>,

    /// Name of the auto-update target, if any
    #[serde(default)]
    pub auto_update: Option<String>,

    /// Default interpreter override
    #[serde(default)]
    pub default_interpreter: Option<String>,
}

/// Errors loading a definitions document.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed document
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Structurally invalid definition
    #[error("invalid definition: {0}")]
    Invalid(String),
}

impl Definitions {
    /// Parse a JSON definitions document.
    pub fn from_json_str(s: &str) -> Result<Self, DefinitionError> {
        let defs: Definitions = serde_json::from_str(s)?;
        defs.validate()?;
        Ok(defs)
    }

    /// Read and parse a JSON definitions file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check for problems that need no resolver state to detect.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        for t in &self.targets {
            if t.name.is_empty() {
                return Err(DefinitionError::Invalid("empty target name".into()));
            }
            if t.name.starts_with(FACT_SIGIL) {
                return Err(DefinitionError::Invalid(format!(
                    "target name '{}' starts with the fact sigil",
                    t.name
                )));
            }
            if t.depends.iter().any(|d| d.is_empty() || d == "$") {
                return Err(DefinitionError::Invalid(format!(
                    "target '{}' has an empty dependency",
                    t.name
                )));
            }
        }
        Ok(())
    }

    /// Apply document-level settings on top of a base configuration.
    pub fn apply_to(&self, mut config: ResolverConfig) -> ResolverConfig {
        if let Some(interp) = &self.default_interpreter {
            config.default_interpreter = interp.clone();
        }
        if self.auto_update.is_some() {
            config.auto_update = self.auto_update.clone();
        }
        config
    }
}
