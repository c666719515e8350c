//! The `.mag/` data directory: config file and index database for one codebase

use crate::config::{Config, DEFAULT_CONFIG};
use crate::error::MagError;
use crate::store::VectorIndex;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-codebase data directory
pub const DATA_DIR: &str = ".mag";

const CONFIG_FILE: &str = "config.toml";
const INDEX_FILE: &str = "index.db";

/// A codebase root together with its loaded configuration
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    config: Config,
}

impl Workspace {
    /// Create `.mag/` with the default config
    pub fn init(root: &Path) -> crate::Result<()> {
        let data_dir = root.join(DATA_DIR);
        let config_path = data_dir.join(CONFIG_FILE);

        if config_path.exists() {
            return Err(MagError::ConfigExists(config_path));
        }

        fs::create_dir_all(&data_dir)?;
        fs::write(&config_path, DEFAULT_CONFIG)?;

        // Add .mag to .gitignore if not present
        update_gitignore(root)?;

        Ok(())
    }

    /// Open an initialized codebase
    pub fn open(root: &Path) -> crate::Result<Self> {
        ensure_root(root)?;
        let data_dir = root.join(DATA_DIR);
        let config_path = data_dir.join(CONFIG_FILE);

        let config = if config_path.exists() {
            Config::load(&config_path)?
        } else {
            if !data_dir.exists() {
                return Err(MagError::NotInitialized);
            }
            Config::default()
        };

        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    /// Open, initializing `.mag/` on first use
    pub fn open_or_init(root: &Path) -> crate::Result<Self> {
        ensure_root(root)?;
        if !root.join(DATA_DIR).exists() {
            Self::init(root)?;
        }
        Self::open(root)
    }

    /// Workspace with an in-memory config; `.mag/` is created on demand
    pub fn with_config(root: &Path, config: Config) -> crate::Result<Self> {
        ensure_root(root)?;
        config.validate()?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir().join(INDEX_FILE)
    }

    /// Open a connection to the index database
    pub fn open_index(&self) -> crate::Result<VectorIndex> {
        fs::create_dir_all(self.data_dir())?;
        VectorIndex::open(&self.index_path())
    }

    /// Delete the index database files; the next `open_index` starts empty
    pub fn reset_index(&self) -> crate::Result<()> {
        for suffix in ["", "-wal", "-shm"] {
            let path = self.data_dir().join(format!("{}{}", INDEX_FILE, suffix));
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Size of the index database including its WAL, in bytes
    pub fn index_size_bytes(&self) -> u64 {
        let db = self.index_path();
        let wal = self.data_dir().join(format!("{}-wal", INDEX_FILE));
        [db, wal]
            .iter()
            .filter_map(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }
}

fn ensure_root(root: &Path) -> crate::Result<()> {
    match fs::metadata(root) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(MagError::Discovery {
            path: root.to_path_buf(),
            message: "not a directory".to_string(),
        }),
        Err(e) => Err(MagError::Discovery {
            path: root.to_path_buf(),
            message: e.to_string(),
        }),
    }
}

/// Update .gitignore to include .mag/
fn update_gitignore(root: &Path) -> crate::Result<()> {
    let gitignore_path = root.join(".gitignore");

    if gitignore_path.exists() {
        let content = fs::read_to_string(&gitignore_path)?;
        if !content
            .lines()
            .any(|line| line.trim() == DATA_DIR || line.trim() == ".mag/")
        {
            let mut file = fs::OpenOptions::new().append(true).open(&gitignore_path)?;
            use std::io::Write;
            writeln!(file, "\n# Mag index\n.mag/")?;
        }
    } else {
        fs::write(&gitignore_path, "# Mag index\n.mag/\n")?;
    }

    Ok(())
}
