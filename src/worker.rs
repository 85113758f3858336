//! Background re-ingestion of workouts marked dirty.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::parser;
use crate::units::{human_distance_km, human_speed_kph, human_tempo_km};

/// Re-derives the measured data of every dirty workout from its stored
/// upload. Name, notes, type and equipment are left as the user set them.
/// Workouts without an upload, or whose upload no longer parses, are simply
/// marked clean. A workout that cannot be saved is logged and stays dirty
/// without holding up the others. Returns the number of workouts that were
/// re-derived.
pub fn refresh_dirty(db: &Database) -> Result<usize> {
    let dirty = db.dirty_workouts().context("loading dirty workouts")?;
    let mut refreshed = 0;

    for mut workout in dirty {
        let Some(id) = workout.id else { continue };

        let parsed = match (workout.filename.as_deref(), workout.content.as_deref()) {
            (Some(filename), Some(content)) => match parser::parse_activity(filename, content) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!("Could not refresh workout {}: {:#}", id, e);
                    None
                }
            },
            _ => None,
        };

        let Some(parsed) = parsed else {
            if let Err(e) = db.clear_dirty(id) {
                error!("Could not mark workout {} as refreshed: {}", id, e);
            }
            continue;
        };

        workout.date = Some(parsed.date);
        workout.data = Some(parsed.data);
        workout.dirty = false;
        // stored content stays as it is
        workout.content = None;

        if let Err(e) = db.save_workout(&mut workout) {
            error!("Could not save refreshed workout {}: {}", id, e);
            continue;
        }
        if let Some(data) = &workout.data {
            debug!(
                "Refreshed workout {}: {} at {} ({})",
                id,
                human_distance_km(data.total_distance),
                human_speed_kph(data.average_speed()),
                human_tempo_km(data.average_speed())
            );
        }
        refreshed += 1;
    }

    Ok(refreshed)
}

/// One worker tick: refresh dirty workouts and drop expired sessions.
pub fn tick(db: &Database) -> Result<()> {
    let refreshed = refresh_dirty(db)?;
    if refreshed > 0 {
        info!("Refreshed {} workouts", refreshed);
    }

    let purged = db.purge_expired_sessions()?;
    if purged > 0 {
        debug!("Purged {} expired sessions", purged);
    }

    Ok(())
}

pub async fn run(database: Arc<Mutex<Database>>, interval: Duration) {
    info!("Background worker started, interval {:?}", interval);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let db = database.lock().await;
        if let Err(e) = tick(&db) {
            error!("Background worker failed: {:#}", e);
        }
    }
}
