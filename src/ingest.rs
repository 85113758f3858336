//! Batch ingestion of uploaded activity files.

use anyhow::Result;
use tracing::{info, warn};

use crate::i18n::Localizer;
use crate::models::{User, Workout, WorkoutType};
use crate::units::human_distance_km;

#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub filename: String,
    pub content: Vec<u8>,
}

/// Turns the raw bytes of one file into a persisted workout owned by `user`.
/// A failure must leave nothing persisted.
pub trait WorkoutIngestor {
    fn add_workout(
        &self,
        user: &User,
        workout_type: WorkoutType,
        notes: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<Workout>;
}

/// Per-file outcome of a batch, in upload order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestReport {
    /// Names of the workouts that were created.
    pub created: Vec<String>,
    pub errors: Vec<String>,
}

impl IngestReport {
    pub fn error_message(&self, l: &Localizer) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }

        Some(l.getf(
            "Encountered {} problems while adding workouts: {}",
            &[&self.errors.len(), &self.errors.join("; ")],
        ))
    }

    pub fn notice_message(&self, l: &Localizer) -> Option<String> {
        if self.created.is_empty() {
            return None;
        }

        Some(l.getf(
            "Added {} new workout(s): {}",
            &[&self.created.len(), &self.created.join("; ")],
        ))
    }
}

/// Hands every file to the ingestor in order. One failing file never stops
/// the rest of the batch.
pub fn ingest_files<I: WorkoutIngestor + ?Sized>(
    ingestor: &I,
    user: &User,
    files: &[UploadedFile],
    notes: &str,
    workout_type: WorkoutType,
) -> IngestReport {
    let mut report = IngestReport::default();

    for file in files {
        match ingestor.add_workout(user, workout_type, notes, &file.filename, &file.content) {
            Ok(w) => {
                let distance = w.data.as_ref().map(|d| d.total_distance).unwrap_or_default();
                info!(
                    user = %user.username,
                    file = %file.filename,
                    "Added workout '{}' ({})",
                    w.name,
                    human_distance_km(distance)
                );
                report.created.push(w.name);
            }
            Err(e) => {
                warn!(user = %user.username, file = %file.filename, "Could not add workout: {:#}", e);
                report.errors.push(format!("{:#}", e));
            }
        }
    }

    report
}
