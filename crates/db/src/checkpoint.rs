// Copyright (C) 2024 Ryan Daum <ryan.daum@gmail.com>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use crate::world_state::WorldState;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// The on-disk snapshot. The `tasks` member is the kernel's serialized
/// record of queued/suspended tasks; the store treats it as opaque.
#[derive(Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub world: WorldState,
    pub tasks: serde_json::Value,
}

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O failure during checkpoint: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
}

impl Snapshot {
    pub fn new(world: WorldState, tasks: serde_json::Value) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            world,
            tasks,
        }
    }
}

/// Write a snapshot. The write goes to a temporary sibling first and is
/// renamed into place, so a crash mid-dump never clobbers the previous
/// checkpoint.
pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), CheckpointError> {
    let tmp_path = path.with_extension("checkpoint-in-progress");
    let file = std::fs::File::create(&tmp_path)?;
    serde_json::to_writer(io::BufWriter::new(file), snapshot)?;
    std::fs::rename(&tmp_path, path)?;
    info!(?path, "Checkpoint written");
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<Snapshot, CheckpointError> {
    let file = std::fs::File::open(path)?;
    let snapshot: Snapshot = serde_json::from_reader(io::BufReader::new(file))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(CheckpointError::UnsupportedVersion(snapshot.version));
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_var::NOTHING;

    #[test]
    fn test_snapshot_roundtrip() {
        let mut world = WorldState::new();
        let obj = world.create_object(&[], NOTHING, false).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.db");
        write_snapshot(&path, &Snapshot::new(world, serde_json::Value::Null)).unwrap();

        let restored = read_snapshot(&path).unwrap();
        assert!(restored.world.valid(obj));
    }
}
