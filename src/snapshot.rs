//! Membership snapshot persistence.
//!
//! The current member list is written to a `state` file in the working
//! directory on every membership change. A node that finds this file on
//! startup has not explicitly left its cluster and uses the persisted list
//! to rejoin; the file is deleted only on a voluntary leave.

use std::path::Path;

use crate::error::Result;
use crate::membership::Member;

/// Name of the snapshot file in the working directory.
pub const SNAPSHOT_FILE: &str = "state";

/// Returns true when a snapshot exists in the working directory.
pub fn exists(working_dir: &Path) -> bool {
    working_dir.join(SNAPSHOT_FILE).is_file()
}

/// Writes the member list to the snapshot file, replacing any previous
/// contents.
pub fn save(working_dir: &Path, members: &[Member]) -> Result<()> {
    let raw = serde_json::to_vec_pretty(members)?;
    std::fs::write(working_dir.join(SNAPSHOT_FILE), raw)?;
    Ok(())
}

/// Reads the member list back from the snapshot file.
pub fn load(working_dir: &Path) -> Result<Vec<Member>> {
    let raw = std::fs::read(working_dir.join(SNAPSHOT_FILE))?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Removes the snapshot file. Missing files are not an error; the node may
/// shut down before its first successful join.
pub fn delete(working_dir: &Path) -> Result<()> {
    match std::fs::remove_file(working_dir.join(SNAPSHOT_FILE)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
