//! TOML-based configuration system for patchport.
//!
//! A single [`AppConfig`] is loaded once at process start and passed
//! explicitly into every component — there is no global configuration
//! state. Tests construct configs directly (see [`AppConfig::for_tests`]).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Contact-point marker settings.
    pub marker: MarkerConfig,

    /// Merge / diff tuning.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Directory trees the tool operates on.
    pub trees: TreesConfig,

    /// Version-control collaborator settings.
    pub vcs: VcsConfig,

    /// Optional behaviour settings.
    #[serde(default)]
    pub options: OptionsConfig,
}

// ---------------------------------------------------------------------------
// Marker
// ---------------------------------------------------------------------------

/// The marker token that delimits custom regions.
///
/// A start line contains `<token> … start`, an end line `<token> … end`,
/// in whatever comment syntax the host language uses (`//<token> start`,
/// `<!--<token> start-->`, …). Detection is by substring, so any wrapping
/// works as long as the token and the `start`/`end` word are on the line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerConfig {
    /// The marker token string.
    pub token: String,
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge / diff tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Similarity ratio (0–100) above which two changed blocks are treated
    /// as the same change. Default 95: exact matches plus incidental
    /// whitespace / formatting drift.
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: u8,

    /// Wall-clock budget in seconds for a single file's line diff. After
    /// the budget the diff returns a coarser best-effort result. 0 or
    /// absent = unbounded.
    #[serde(default)]
    pub diff_deadline_secs: u64,
}

fn default_fuzzy_threshold() -> u8 {
    95
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: default_fuzzy_threshold(),
            diff_deadline_secs: 0,
        }
    }
}

impl MergeConfig {
    /// The diff deadline as a `Duration`, `None` when unbounded.
    pub fn diff_deadline(&self) -> Option<std::time::Duration> {
        (self.diff_deadline_secs > 0)
            .then(|| std::time::Duration::from_secs(self.diff_deadline_secs))
    }
}

// ---------------------------------------------------------------------------
// Trees
// ---------------------------------------------------------------------------

/// The directory trees the tool operates on.
///
/// The contact-points tree mirrors the container tree: a file stored at
/// `<contact_points_dir>/<rel>` pairs with `<container_root>/<rel>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreesConfig {
    /// Root of the container repository working tree (the upstream side).
    pub container_root: PathBuf,

    /// Directory holding the extracted contact-point files.
    pub contact_points_dir: PathBuf,

    /// Subtrees of the container (relative paths) scanned during
    /// extraction. Empty = scan the whole container tree.
    #[serde(default)]
    pub source_roots: Vec<String>,

    /// Directory for the runtime record and the error record.
    pub working_dir: PathBuf,
}

impl TreesConfig {
    /// Path of the persisted runtime record.
    pub fn runtime_record_path(&self) -> PathBuf {
        self.working_dir.join("runtime_record.json")
    }

    /// Path of the append-only error record.
    pub fn error_record_path(&self) -> PathBuf {
        self.working_dir.join("errors.jsonl")
    }
}

// ---------------------------------------------------------------------------
// VCS
// ---------------------------------------------------------------------------

/// Version-control collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcsConfig {
    /// Ref (branch, tag, or sha) in the container repository holding the
    /// unmodified baseline the contact points were written against.
    pub unmodified_ref: String,
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Optional behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsConfig {
    /// Glob patterns excluded from discovery and extraction, matched
    /// against relative paths.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Maximum file size in bytes considered for extraction. 0 = no limit.
    #[serde(default)]
    pub max_file_size: u64,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: Vec::new(),
            max_file_size: 0,
            log_level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validating
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.marker.token.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "marker.token".into(),
                detail: "marker token must not be empty".into(),
            });
        }
        if self.marker.token.contains('\n') {
            return Err(ConfigError::InvalidValue {
                field: "marker.token".into(),
                detail: "marker token must be a single line".into(),
            });
        }
        if self.merge.fuzzy_threshold > 100 {
            return Err(ConfigError::InvalidValue {
                field: "merge.fuzzy_threshold".into(),
                detail: "threshold is a ratio from 0 to 100".into(),
            });
        }
        if self.trees.container_root.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "trees.container_root".into(),
                detail: "container root must not be empty".into(),
            });
        }
        if self.trees.contact_points_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "trees.contact_points_dir".into(),
                detail: "contact points dir must not be empty".into(),
            });
        }
        if self.vcs.unmodified_ref.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "vcs.unmodified_ref".into(),
                detail: "baseline ref must not be empty".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Default config file location (`~/.config/patchport/config.toml`).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("patchport")
            .join("config.toml")
    }

    /// A commented configuration template, written by `patchport init`.
    pub fn template() -> &'static str {
        r#"# patchport configuration

[marker]
# Token delimiting custom regions. Start lines contain "<token> ... start",
# end lines "<token> ... end", in any comment syntax.
token = "PATCHPORT: CHANGE-ME-TO-A-UNIQUE-TOKEN"

[merge]
# Similarity ratio (0-100) above which two changed blocks count as the
# same change.
fuzzy_threshold = 95
# Wall-clock budget in seconds per file diff. 0 = unbounded.
diff_deadline_secs = 10

[trees]
# Root of the container repository working tree (the upstream side).
container_root = "/path/to/container"
# Directory holding extracted contact-point files (mirrors the container tree).
contact_points_dir = "/path/to/feature/contactPoints"
# Container subtrees scanned during extraction. Empty = whole tree.
source_roots = ["src"]
# Where the runtime record and error record are written.
working_dir = "/path/to/workdir"

[vcs]
# Ref in the container repo holding the unmodified baseline the contact
# points were written against.
unmodified_ref = "unmodified_v1.0.0"

[options]
ignore_patterns = []
max_file_size = 0
log_level = "info"
"#
    }

    /// A minimal in-memory config for unit tests.
    pub fn for_tests(marker_token: &str) -> Self {
        Self {
            marker: MarkerConfig {
                token: marker_token.to_string(),
            },
            merge: MergeConfig::default(),
            trees: TreesConfig {
                container_root: PathBuf::from("/tmp/container"),
                contact_points_dir: PathBuf::from("/tmp/contactPoints"),
                source_roots: Vec::new(),
                working_dir: PathBuf::from("/tmp/work"),
            },
            vcs: VcsConfig {
                unmodified_ref: "unmodified_test".into(),
            },
            options: OptionsConfig::default(),
        }
    }
}
