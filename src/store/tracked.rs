// Tracked-user file mirror.
//
// The tracked set is engine state; this mirror just makes it survive
// restarts. Format: optional `#` header lines, then one lower-cased
// username per line. The file is fully rewritten on every mutation.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub struct TrackedUsersFile {
    path: PathBuf,
}

impl TrackedUsersFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Read usernames from the mirror. A missing file is an empty set.
    pub fn load(&self) -> Result<Vec<String>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Failed to read tracked users from {}", self.path.display())
                })
            }
        };

        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_lowercase)
            .collect())
    }

    /// Rewrite the mirror with the full current set.
    pub fn save(&self, usernames: &[String]) -> Result<()> {
        let mut contents = String::from("# ratioscope tracked users\n");
        for username in usernames {
            contents.push_str(&username.to_lowercase());
            contents.push('\n');
        }
        fs::write(&self.path, contents).with_context(|| {
            format!("Failed to write tracked users to {}", self.path.display())
        })
    }
}
