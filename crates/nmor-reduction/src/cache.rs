//! Bincode caches of the solution and registration stages.
//!
//! Caches are loaded verbatim: nothing checks that they were produced from
//! the current training set or configuration.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use nmor_core::VelocityField;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ReductionError, Result};
use crate::records::{RegisteredSnapshot, Snapshot};

/// File name of the full-solution cache inside a cache directory.
pub const FULL_SOLUTIONS_FILE: &str = "full_solutions.bin";
/// File name of the velocity-field cache inside a cache directory.
pub const VELOCITY_FIELDS_FILE: &str = "full_velocity_fields.bin";

fn write_cache<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(|e| ReductionError::cache_io(path, e))?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, value).map_err(|e| ReductionError::cache(path, e))?;
    writer.flush().map_err(|e| ReductionError::cache_io(path, e))?;
    tracing::info!("Wrote cache {}", path.display());
    Ok(())
}

fn read_cache<T: DeserializeOwned>(path: &Path) -> Result<T> {
    // Decoding from the file bytes bounds every length prefix by the file size.
    let bytes = fs::read(path).map_err(|e| ReductionError::cache_io(path, e))?;
    let value = bincode::deserialize(&bytes).map_err(|e| ReductionError::cache(path, e))?;
    tracing::info!("Loaded cache {}", path.display());
    Ok(value)
}

pub fn save_snapshots(path: &Path, snapshots: &[Snapshot]) -> Result<()> {
    write_cache(path, snapshots)
}

pub fn load_snapshots(path: &Path) -> Result<Vec<Snapshot>> {
    read_cache(path)
}

/// Store the velocity fields of `snapshots` in snapshot order.
pub fn save_velocity_fields(path: &Path, snapshots: &[RegisteredSnapshot]) -> Result<()> {
    let fields: Vec<&VelocityField> = snapshots.iter().map(|s| &s.velocity_field).collect();
    write_cache(path, &fields)
}

pub fn load_velocity_fields(path: &Path) -> Result<Vec<VelocityField>> {
    read_cache(path)
}

/// Attach cached velocity fields to snapshots by position.
pub fn attach_velocity_fields(
    snapshots: Vec<Snapshot>,
    fields: Vec<VelocityField>,
) -> Result<Vec<RegisteredSnapshot>> {
    if snapshots.len() != fields.len() {
        return Err(ReductionError::CacheMismatch {
            expected: snapshots.len(),
            found: fields.len(),
        });
    }
    Ok(snapshots
        .into_iter()
        .zip(fields)
        .map(|(snapshot, field)| snapshot.registered(field))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nmor_core::{Parameter, ScalarField};

    fn snapshots() -> Vec<Snapshot> {
        (0..3)
            .map(|i| {
                let mu = 0.5 + i as f64 * 0.5;
                let values = (0..12).map(|k| mu * k as f64).collect();
                Snapshot::new(
                    Parameter::Scalar(mu),
                    ScalarField::from_flat([4, 3], values).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_snapshot_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FULL_SOLUTIONS_FILE);
        save_snapshots(&path, &snapshots()).unwrap();
        assert_eq!(load_snapshots(&path).unwrap(), snapshots());
    }

    #[test]
    fn test_velocity_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(VELOCITY_FIELDS_FILE);
        let registered: Vec<RegisteredSnapshot> = snapshots()
            .into_iter()
            .enumerate()
            .map(|(i, s)| s.registered(VelocityField::zeros([4, 3]).scaled(i as f64)))
            .collect();
        save_velocity_fields(&path, &registered).unwrap();

        let fields = load_velocity_fields(&path).unwrap();
        let attached = attach_velocity_fields(snapshots(), fields).unwrap();
        assert_eq!(attached, registered);
    }

    #[test]
    fn test_attach_length_mismatch() {
        let fields = vec![VelocityField::zeros([4, 3])];
        assert!(matches!(
            attach_velocity_fields(snapshots(), fields),
            Err(ReductionError::CacheMismatch {
                expected: 3,
                found: 1
            })
        ));
    }

    #[test]
    fn test_missing_and_corrupt_caches() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_snapshots(&dir.path().join("missing.bin")),
            Err(ReductionError::Cache { .. })
        ));
        let path = dir.path().join("corrupt.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        assert!(matches!(
            load_velocity_fields(&path),
            Err(ReductionError::Cache { .. })
        ));
    }

    #[test]
    fn test_oversized_length_prefix_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.bin");
        let mut bytes = u64::MAX.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"not a cache");
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            load_snapshots(&path),
            Err(ReductionError::Cache { .. })
        ));
        assert!(matches!(
            load_velocity_fields(&path),
            Err(ReductionError::Cache { .. })
        ));
    }
}
