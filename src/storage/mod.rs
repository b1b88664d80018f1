pub mod client_db;
pub mod models;

pub use client_db::ClientDatabase;

use std::fs;
use std::path::Path;

/// Ensure data directory exists
pub fn ensure_data_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}
