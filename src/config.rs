//! Loads project configuration from an optional `sitepipe.yaml`. The file is
//! searched for in the starting directory and then each of its ancestors; the
//! directory that contains it becomes the project root. Without a file, the
//! starting directory is the root and every default applies.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct Project {
    #[serde(default)]
    source_directory: Option<PathBuf>,

    #[serde(default)]
    public_directory: Option<PathBuf>,

    #[serde(default)]
    dist_directory: Option<PathBuf>,

    #[serde(default)]
    cache_directory: Option<PathBuf>,

    #[serde(default)]
    server: ServerConfig,

    #[serde(default)]
    watch: WatchConfig,
}

/// Settings for the development server.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// When set, changed stylesheets are swapped in place instead of
    /// reloading the page.
    pub inject_css: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_owned(),
            port: 3000,
            inject_css: true,
        }
    }
}

/// Settings for the file watchers.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    /// How long to wait for a burst of change events to settle before
    /// re-running a step.
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig { debounce_ms: 100 }
    }
}

/// The resolved configuration. Every directory is absolute (joined onto the
/// project root).
#[derive(Clone, Debug)]
pub struct Config {
    pub root_directory: PathBuf,
    pub source_directory: PathBuf,
    pub public_directory: PathBuf,
    pub dist_directory: PathBuf,
    pub cache_directory: PathBuf,
    pub server: ServerConfig,
    pub watch: WatchConfig,
}

impl Config {
    pub const FILE_NAME: &'static str = "sitepipe.yaml";

    /// Searches `dir` and its ancestors for [`Config::FILE_NAME`].
    pub fn from_directory(dir: &Path) -> Result<Config> {
        for ancestor in dir.ancestors() {
            let path = ancestor.join(Config::FILE_NAME);
            if path.exists() {
                return Config::from_project_file(&path)
                    .map_err(|e| anyhow!("Loading configuration: {:?}", e));
            }
        }
        Ok(Config::from_project(dir, Project::default()))
    }

    pub fn from_project_file(path: &Path) -> Result<Config> {
        use crate::util::open;
        let project: Project = serde_yaml::from_reader(open(path, "project")?)?;
        match path.parent() {
            None => Err(anyhow!(
                "Can't get parent directory for provided project file path '{:?}'",
                path
            )),
            Some(project_root) => Ok(Config::from_project(project_root, project)),
        }
    }

    /// The defaults for a project rooted at `root`.
    pub fn with_root(root: &Path) -> Config {
        Config::from_project(root, Project::default())
    }

    fn from_project(root: &Path, project: Project) -> Config {
        let dir = |configured: Option<PathBuf>, default: &str| {
            root.join(configured.unwrap_or_else(|| PathBuf::from(default)))
        };
        Config {
            root_directory: root.to_owned(),
            source_directory: dir(project.source_directory, "src"),
            public_directory: dir(project.public_directory, "public"),
            dist_directory: dir(project.dist_directory, "dist"),
            cache_directory: dir(project.cache_directory, ".sitepipe-cache"),
            server: project.server,
            watch: project.watch,
        }
    }

    /// The source directory for one asset type, e.g. `source("scss")`.
    pub fn source(&self, kind: &str) -> PathBuf {
        self.source_directory.join(kind)
    }

    pub fn public(&self, kind: &str) -> PathBuf {
        self.public_directory.join(kind)
    }

    pub fn dist(&self, kind: &str) -> PathBuf {
        self.dist_directory.join(kind)
    }
}
