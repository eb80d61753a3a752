//! Builds fake sysfs trees in temporary directories.

use std::fs::{self, File};
use std::{io::Write, path::Path};

/// Entry to be created in the mock filesystem
pub enum EntryType<'a> {
    File(&'a str),
    Dir,
}

pub struct Entry<'a> {
    pub path: &'a str,
    pub entry_type: EntryType<'a>,
}

/// Create (or overwrite) all entries under `base_path`.
pub fn create_mock_layout(base_path: &Path, entries: &[Entry]) -> std::io::Result<()> {
    for entry in entries {
        let full_path = base_path.join(entry.path);
        match &entry.entry_type {
            EntryType::Dir => fs::create_dir_all(&full_path)?,
            EntryType::File(content) => {
                if let Some(parent) = full_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut file = File::create(full_path)?;
                file.write_all(content.as_bytes())?;
            }
        }
    }
    Ok(())
}

/// Shorthand for a file entry.
pub fn file<'a>(path: &'a str, content: &'a str) -> Entry<'a> {
    Entry {
        path,
        entry_type: EntryType::File(content),
    }
}
