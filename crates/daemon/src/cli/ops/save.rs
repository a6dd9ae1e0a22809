use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;

use blobs_store::{Store, StoreError};
use common::ContentHash;
use hive_daemon::ConfigError;

#[derive(Args, Debug, Clone)]
pub struct Save {
    /// File to store
    pub path: PathBuf,

    /// Move the file into the store instead of copying it
    #[arg(long)]
    pub destructive: bool,
}

#[derive(Debug)]
pub struct SaveOutput {
    pub path: PathBuf,
    pub hash: ContentHash,
    pub stored_at: PathBuf,
}

impl fmt::Display for SaveOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.hash.to_hex().bold())?;
        writeln!(f, "  {} {}", "source:".dimmed(), self.path.display())?;
        write!(f, "  {} {}", "stored:".dimmed(), self.stored_at.display())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),
}

impl crate::cli::op::Op for Save {
    type Error = SaveError;
    type Output = SaveOutput;

    fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        if !self.path.is_file() {
            return Err(SaveError::NotAFile(self.path.clone()));
        }
        let store = Store::open(ctx.config.store_config()?)?;
        let hash = if self.destructive {
            store.destructive_save_path(&self.path)?
        } else {
            store.save_path(&self.path)?
        };
        Ok(SaveOutput {
            path: self.path.clone(),
            hash,
            stored_at: store.path(&hash),
        })
    }
}
