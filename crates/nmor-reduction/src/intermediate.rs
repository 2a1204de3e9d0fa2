//! Per-parameter registration diagnostics written during a reduction.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use nmor_registration::RegistrationResult;

use crate::error::Result;
use crate::records::Snapshot;

/// Name of the tab-separated error log inside the results directory.
pub const MAPPING_ERRORS_FILE: &str = "relative_mapping_errors.txt";

/// Writes target, mapped and velocity fields plus one error line per registration.
///
/// Lines of the error log read `mu<TAB>relative error<TAB>iterations<TAB>seconds<TAB>reason`.
#[derive(Debug)]
pub struct IntermediateResults {
    dir: PathBuf,
    log: Mutex<()>,
}

impl IntermediateResults {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            log: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record(&self, snapshot: &Snapshot, result: &RegistrationResult) -> Result<()> {
        let tag = snapshot.parameter.file_tag();
        snapshot
            .solution
            .save(self.dir.join(format!("full_solution_mu_{tag}.txt")))?;
        result
            .transformed_input
            .save(self.dir.join(format!("mapped_solution_mu_{tag}.txt")))?;
        result
            .initial_vector_field
            .save(self.dir.join(format!("full_vector_field_mu_{tag}.txt")))?;

        let error = result.relative_mapping_error(&snapshot.solution)?;
        let line = format!(
            "{}\t{}\t{}\t{}\t{}\n",
            snapshot.parameter,
            error,
            result.iterations,
            result.time.as_secs_f64(),
            result.reason_ended
        );

        let _guard = self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(MAPPING_ERRORS_FILE))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}
