use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Well-known option keys consumed by the engine.
pub mod keys {
    /// Command, arguments, and environment for launchable resources.
    pub const COMMAND: &str = "command";
    /// The string carried by a `Value` resource.
    pub const VALUE: &str = "value";
}

/// Content producer for a derived file, evaluated lazily at materialization
/// time. Produces the entries merged into the file, not the file itself.
pub type DerivedEntriesFn = Arc<dyn Fn() -> anyhow::Result<Vec<serde_json::Value>> + Send + Sync>;

/// A typed piece of metadata attached to one resource.
///
/// Annotations accumulate in append order during graph construction and
/// during the owning resource's own phase hooks. Append never replaces:
/// consumers decide how repeated annotations combine (watch entries are
/// unioned, options are last-write-wins).
#[derive(Clone)]
pub enum Annotation {
    /// A named singular configuration object. The last appended annotation
    /// with a given key wins at consumption time.
    Options(OptionsAnnotation),
    /// A URL pattern for the watch list. May repeat; duplicates are kept
    /// here for audit and deduplicated case-insensitively at materialization.
    WatchEntry(String),
    /// A derived file contribution: a relative file name plus a lazy
    /// entry-producing closure.
    DerivedFile(DerivedFileAnnotation),
}

impl Annotation {
    /// An options annotation from an already-serialized value.
    pub fn options(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self::Options(OptionsAnnotation {
            key: key.into(),
            value,
        })
    }

    /// An options annotation from any serializable configuration object.
    pub fn options_from<T: Serialize>(key: impl Into<String>, options: &T) -> anyhow::Result<Self> {
        Ok(Self::Options(OptionsAnnotation {
            key: key.into(),
            value: serde_json::to_value(options)?,
        }))
    }

    /// A watch-list entry.
    pub fn watch(url: impl Into<String>) -> Self {
        Self::WatchEntry(url.into())
    }

    /// The string value carried by a `Value` resource.
    pub fn value(value: impl Into<String>) -> Self {
        Self::Options(OptionsAnnotation {
            key: keys::VALUE.to_string(),
            value: serde_json::Value::String(value.into()),
        })
    }

    /// A derived-file contribution with a lazy entry producer.
    pub fn derived_file(
        file_name: impl Into<String>,
        produce: impl Fn() -> anyhow::Result<Vec<serde_json::Value>> + Send + Sync + 'static,
    ) -> Self {
        Self::DerivedFile(DerivedFileAnnotation {
            file_name: file_name.into(),
            produce: Arc::new(produce),
        })
    }
}

impl fmt::Debug for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Options(o) => f.debug_tuple("Options").field(o).finish(),
            Self::WatchEntry(url) => f.debug_tuple("WatchEntry").field(url).finish(),
            Self::DerivedFile(d) => f.debug_tuple("DerivedFile").field(d).finish(),
        }
    }
}

/// A singular configuration object identified by a key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptionsAnnotation {
    pub key: String,
    pub value: serde_json::Value,
}

/// A derived-file contribution. The closure runs at materialization time,
/// never at append time.
#[derive(Clone)]
pub struct DerivedFileAnnotation {
    /// File name relative to the resource's working directory.
    pub file_name: String,
    /// Entry producer.
    pub produce: DerivedEntriesFn,
}

impl fmt::Debug for DerivedFileAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedFileAnnotation")
            .field("file_name", &self.file_name)
            .finish_non_exhaustive()
    }
}

/// Launch configuration for resources backed by an external process.
///
/// Attached as an options annotation under [`keys::COMMAND`]. The engine
/// hands the fully resolved result to the process launcher once the
/// resource completes all phases.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct CommandOptions {
    /// Program to execute.
    pub command: String,
    /// Arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the process. Defaults to the resource's own
    /// working directory under the run root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
    /// Static environment variables. Overlaid on top of the injected
    /// reference environment, so explicit configuration wins.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandOptions {
    /// Build the options annotation for this command.
    pub fn annotation(&self) -> anyhow::Result<Annotation> {
        Annotation::options_from(keys::COMMAND, self)
    }
}
