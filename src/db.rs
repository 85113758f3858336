use anyhow::Context;
use chrono::NaiveDateTime;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::time::Duration;
use tracing::{info, warn};

use crate::auth;
use crate::i18n::{Language, BROWSER_LANGUAGE};
use crate::ingest::WorkoutIngestor;
use crate::models::{Equipment, Profile, User, Workout, WorkoutData, WorkoutTotals, WorkoutType};
use crate::parser;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        username TEXT UNIQUE NOT NULL,
        name TEXT NOT NULL,
        password_hash TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        admin INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS profiles (
        user_id INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
        language TEXT NOT NULL,
        preferred_units TEXT NOT NULL,
        totals_show TEXT NOT NULL,
        prefer_full_date INTEGER NOT NULL DEFAULT 0,
        socials_disabled INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        language TEXT,
        notice TEXT,
        error TEXT,
        expires_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS workouts (
        id INTEGER PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        notes TEXT NOT NULL DEFAULT '',
        date TEXT NOT NULL,
        type TEXT NOT NULL,
        creator TEXT NOT NULL DEFAULT '',
        total_distance REAL NOT NULL DEFAULT 0,
        total_duration REAL NOT NULL DEFAULT 0,
        total_repetitions INTEGER NOT NULL DEFAULT 0,
        total_weight REAL NOT NULL DEFAULT 0,
        country_code TEXT,
        track TEXT,
        filename TEXT,
        content BLOB,
        dirty INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS workouts_user_date ON workouts (user_id, date)",
    "CREATE TABLE IF NOT EXISTS equipment (
        id INTEGER PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        active INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE TABLE IF NOT EXISTS workout_equipment (
        workout_id INTEGER NOT NULL REFERENCES workouts(id) ON DELETE CASCADE,
        equipment_id INTEGER NOT NULL REFERENCES equipment(id) ON DELETE CASCADE,
        PRIMARY KEY (workout_id, equipment_id)
    )",
];

const USER_COLUMNS: &str = "u.id, u.username, u.name, u.password_hash, u.active, u.admin,
    p.language, p.preferred_units, p.totals_show, p.prefer_full_date, p.socials_disabled";

const WORKOUT_COLUMNS: &str = "id, user_id, name, notes, date, type, creator, total_distance,
    total_duration, total_repetitions, total_weight, country_code, track, filename, dirty";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("could not hash password: {0}")]
    Password(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flash {
    Notice,
    Error,
}

impl Flash {
    fn column(&self) -> &'static str {
        match self {
            Flash::Notice => "notice",
            Flash::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub user_id: i64,
    /// Language resolved at sign-in or on the last profile update.
    pub language: Option<String>,
    pub expires_at: i64,
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    let units: String = row.get(7)?;
    let totals_show: String = row.get(8)?;

    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        name: row.get(2)?,
        password_hash: row.get(3)?,
        active: row.get(4)?,
        admin: row.get(5)?,
        profile: Profile {
            language: row.get(6)?,
            preferred_units: units.parse().unwrap_or_default(),
            totals_show: totals_show.parse().unwrap_or(WorkoutType::Running),
            prefer_full_date: row.get(9)?,
            socials_disabled: row.get(10)?,
        },
    })
}

fn workout_from_row(row: &Row) -> rusqlite::Result<Workout> {
    let date: String = row.get(4)?;
    let workout_type: String = row.get(5)?;
    let duration: f64 = row.get(8)?;
    let track: Option<String> = row.get(12)?;

    Ok(Workout {
        id: Some(row.get(0)?),
        user_id: row.get(1)?,
        name: row.get(2)?,
        notes: row.get(3)?,
        date: NaiveDateTime::parse_from_str(&date, DATE_FORMAT).ok(),
        workout_type: workout_type.parse().unwrap_or(WorkoutType::Other),
        data: Some(WorkoutData {
            creator: row.get(6)?,
            total_distance: row.get(7)?,
            total_duration: Duration::try_from_secs_f64(duration).unwrap_or_default(),
            total_repetitions: row.get(9)?,
            total_weight: row.get(10)?,
            country_code: row.get(11)?,
            track: track.and_then(|t| serde_json::from_str(&t).ok()),
        }),
        filename: row.get(13)?,
        content: None,
        dirty: row.get(14)?,
        equipment: Vec::new(),
    })
}

fn equipment_from_row(row: &Row) -> rusqlite::Result<Equipment> {
    Ok(Equipment {
        id: Some(row.get(0)?),
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        active: row.get(4)?,
    })
}

fn validate_username(username: &str) -> StoreResult<()> {
    let valid = !username.is_empty()
        && username.len() <= 64
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !valid {
        return Err(StoreError::Validation(format!(
            "invalid username {:?}",
            username
        )));
    }
    Ok(())
}

fn validate_profile(profile: &Profile) -> StoreResult<()> {
    let language_ok = profile.language == BROWSER_LANGUAGE
        || Language::all().iter().any(|l| l.code() == profile.language);
    if !language_ok {
        return Err(StoreError::Validation(format!(
            "unsupported language {:?}",
            profile.language
        )));
    }
    if profile.totals_show == WorkoutType::AutoDetect {
        return Err(StoreError::Validation(
            "totals must show a concrete workout type".to_string(),
        ));
    }
    Ok(())
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &str) -> StoreResult<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        for statement in SCHEMA {
            conn.execute(statement, ())?;
        }
        Ok(Database { conn })
    }

    // --- Users & profiles ---

    pub fn user_count(&self) -> StoreResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
    }

    pub fn create_user(
        &self,
        username: &str,
        name: &str,
        password: &str,
        admin: bool,
    ) -> StoreResult<User> {
        validate_username(username)?;
        if password.is_empty() {
            return Err(StoreError::Validation("password is required".to_string()));
        }
        if self.user_by_username(username)?.is_some() {
            return Err(StoreError::Validation(format!(
                "username {:?} is already taken",
                username
            )));
        }

        let password_hash =
            auth::hash_password(password).map_err(|e| StoreError::Password(e.to_string()))?;
        let display_name = if name.trim().is_empty() { username } else { name.trim() };

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO users (username, name, password_hash, active, admin, created_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?5)",
            params![username, display_name, password_hash, admin, unix_now()],
        )?;
        let id = tx.last_insert_rowid();
        let profile = Profile::default();
        tx.execute(
            "INSERT INTO profiles (user_id, language, preferred_units, totals_show, prefer_full_date, socials_disabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                profile.language,
                profile.preferred_units.as_str(),
                profile.totals_show.as_str(),
                profile.prefer_full_date,
                profile.socials_disabled
            ],
        )?;
        tx.commit()?;

        self.user_by_id(id)?.ok_or(StoreError::NotFound("user"))
    }

    /// Creates `admin`/`admin` when no account exists yet.
    pub fn ensure_admin_user(&self) -> StoreResult<bool> {
        if self.user_count()? > 0 {
            return Ok(false);
        }

        warn!("Creating admin user 'admin', with password 'admin'");
        self.create_user("admin", "Administrator", "admin", true)?;
        Ok(true)
    }

    pub fn user_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users u JOIN profiles p ON p.user_id = u.id WHERE u.id = ?1"
        );
        Ok(self
            .conn
            .query_row(&sql, params![id], user_from_row)
            .optional()?)
    }

    pub fn user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users u JOIN profiles p ON p.user_id = u.id WHERE u.username = ?1"
        );
        Ok(self
            .conn
            .query_row(&sql, params![username], user_from_row)
            .optional()?)
    }

    /// The active user matching the credentials, if any.
    pub fn authenticate(&self, username: &str, password: &str) -> StoreResult<Option<User>> {
        let Some(user) = self.user_by_username(username)? else {
            return Ok(None);
        };
        if !user.active || !auth::verify_password(password, &user.password_hash) {
            return Ok(None);
        }
        Ok(Some(user))
    }

    pub fn save_profile(&self, user_id: i64, profile: &Profile) -> StoreResult<()> {
        validate_profile(profile)?;

        let updated = self.conn.execute(
            "UPDATE profiles SET language = ?1, preferred_units = ?2, totals_show = ?3,
                prefer_full_date = ?4, socials_disabled = ?5
             WHERE user_id = ?6",
            params![
                profile.language,
                profile.preferred_units.as_str(),
                profile.totals_show.as_str(),
                profile.prefer_full_date,
                profile.socials_disabled,
                user_id
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound("user"));
        }
        Ok(())
    }

    // --- Sessions ---

    pub fn create_session(
        &self,
        user_id: i64,
        language: Option<&str>,
        lifetime: Duration,
    ) -> StoreResult<Session> {
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            language: language.map(str::to_string),
            expires_at: unix_now()
                .saturating_add(i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX)),
        };
        self.conn.execute(
            "INSERT INTO sessions (id, user_id, language, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![session.id, session.user_id, session.language, session.expires_at],
        )?;
        Ok(session)
    }

    pub fn session(&self, id: &str) -> StoreResult<Option<Session>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, user_id, language, expires_at FROM sessions
                 WHERE id = ?1 AND expires_at > ?2",
                params![id, unix_now()],
                |row| {
                    Ok(Session {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        language: row.get(2)?,
                        expires_at: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn set_session_language(&self, id: &str, language: Option<&str>) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE sessions SET language = ?1 WHERE id = ?2",
            params![language, id],
        )?;
        Ok(())
    }

    pub fn delete_session(&self, id: &str) -> StoreResult<()> {
        self.conn
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn purge_expired_sessions(&self) -> StoreResult<usize> {
        Ok(self.conn.execute(
            "DELETE FROM sessions WHERE expires_at <= ?1",
            params![unix_now()],
        )?)
    }

    pub fn set_flash(&self, session_id: &str, kind: Flash, message: &str) -> StoreResult<()> {
        let sql = format!("UPDATE sessions SET {} = ?1 WHERE id = ?2", kind.column());
        self.conn.execute(&sql, params![message, session_id])?;
        Ok(())
    }

    /// Returns and clears the pending (notice, error) pair.
    pub fn take_flash(&self, session_id: &str) -> StoreResult<(Option<String>, Option<String>)> {
        let flash = self
            .conn
            .query_row(
                "SELECT notice, error FROM sessions WHERE id = ?1",
                params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .unwrap_or((None, None));

        if flash != (None, None) {
            self.conn.execute(
                "UPDATE sessions SET notice = NULL, error = NULL WHERE id = ?1",
                params![session_id],
            )?;
        }
        Ok(flash)
    }

    // --- Workouts ---

    /// Inserts a new workout or updates an existing one owned by the same
    /// user. Stored upload content is only replaced when the workout carries
    /// new content.
    pub fn save_workout(&self, workout: &mut Workout) -> StoreResult<()> {
        workout.validate().map_err(StoreError::Validation)?;
        let Some(data) = workout.data.as_ref() else {
            return Err(StoreError::Validation("workout has no data".to_string()));
        };

        let date = workout
            .date
            .map(|d| d.format(DATE_FORMAT).to_string())
            .unwrap_or_default();
        let track = data.track.as_ref().map(serde_json::to_string).transpose()?;

        match workout.id {
            None => {
                self.conn.execute(
                    "INSERT INTO workouts (user_id, name, notes, date, type, creator, total_distance,
                        total_duration, total_repetitions, total_weight, country_code, track,
                        filename, content, dirty)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                    params![
                        workout.user_id,
                        workout.name,
                        workout.notes,
                        date,
                        workout.workout_type.as_str(),
                        data.creator,
                        data.total_distance,
                        data.total_duration.as_secs_f64(),
                        data.total_repetitions,
                        data.total_weight,
                        data.country_code,
                        track,
                        workout.filename,
                        workout.content,
                        workout.dirty
                    ],
                )?;
                workout.id = Some(self.conn.last_insert_rowid());
            }
            Some(id) => {
                let updated = self.conn.execute(
                    "UPDATE workouts SET name = ?1, notes = ?2, date = ?3, type = ?4, creator = ?5,
                        total_distance = ?6, total_duration = ?7, total_repetitions = ?8,
                        total_weight = ?9, country_code = ?10, track = ?11,
                        filename = COALESCE(?12, filename), content = COALESCE(?13, content),
                        dirty = ?14
                     WHERE id = ?15 AND user_id = ?16",
                    params![
                        workout.name,
                        workout.notes,
                        date,
                        workout.workout_type.as_str(),
                        data.creator,
                        data.total_distance,
                        data.total_duration.as_secs_f64(),
                        data.total_repetitions,
                        data.total_weight,
                        data.country_code,
                        track,
                        workout.filename,
                        workout.content,
                        workout.dirty,
                        id,
                        workout.user_id
                    ],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound("workout"));
                }
            }
        }

        Ok(())
    }

    /// A single workout with its equipment, if `user_id` owns it.
    pub fn workout_for_user(&self, user_id: i64, id: i64) -> StoreResult<Option<Workout>> {
        let sql = format!("SELECT {WORKOUT_COLUMNS} FROM workouts WHERE id = ?1 AND user_id = ?2");
        let workout = self
            .conn
            .query_row(&sql, params![id, user_id], workout_from_row)
            .optional()?;

        match workout {
            Some(mut w) => {
                w.equipment = self.workout_equipment(id)?;
                Ok(Some(w))
            }
            None => Ok(None),
        }
    }

    /// Newest first. Equipment is not loaded.
    pub fn workouts_for_user(&self, user_id: i64) -> StoreResult<Vec<Workout>> {
        let sql = format!(
            "SELECT {WORKOUT_COLUMNS} FROM workouts WHERE user_id = ?1 ORDER BY date DESC, id DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], workout_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn delete_workout(&self, user_id: i64, id: i64) -> StoreResult<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM workouts WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(deleted > 0)
    }

    pub fn mark_workout_dirty(&self, user_id: i64, id: i64) -> StoreResult<bool> {
        let updated = self.conn.execute(
            "UPDATE workouts SET dirty = 1 WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(updated > 0)
    }

    pub fn mark_user_workouts_dirty(&self, user_id: i64) -> StoreResult<usize> {
        Ok(self.conn.execute(
            "UPDATE workouts SET dirty = 1 WHERE user_id = ?1",
            params![user_id],
        )?)
    }

    /// Workouts waiting to be re-ingested, with their stored upload.
    pub fn dirty_workouts(&self) -> StoreResult<Vec<Workout>> {
        let sql = format!("SELECT {WORKOUT_COLUMNS}, content FROM workouts WHERE dirty = 1 ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let mut w = workout_from_row(row)?;
            w.content = row.get(15)?;
            Ok(w)
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn clear_dirty(&self, id: i64) -> StoreResult<()> {
        self.conn
            .execute("UPDATE workouts SET dirty = 0 WHERE id = ?1", params![id])?;
        Ok(())
    }

    // --- Equipment ---

    pub fn create_equipment(&self, equipment: &mut Equipment) -> StoreResult<()> {
        if equipment.name.trim().is_empty() {
            return Err(StoreError::Validation("equipment name is required".to_string()));
        }

        self.conn.execute(
            "INSERT INTO equipment (user_id, name, description, active) VALUES (?1, ?2, ?3, ?4)",
            params![
                equipment.user_id,
                equipment.name.trim(),
                equipment.description,
                equipment.active
            ],
        )?;
        equipment.id = Some(self.conn.last_insert_rowid());
        Ok(())
    }

    pub fn equipment_for_user(&self, user_id: i64) -> StoreResult<Vec<Equipment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, name, description, active FROM equipment
             WHERE user_id = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![user_id], equipment_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The subset of `ids` that exists and belongs to `user_id`.
    pub fn equipment_by_ids(&self, user_id: i64, ids: &[i64]) -> StoreResult<Vec<Equipment>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, user_id, name, description, active FROM equipment
             WHERE user_id = ? AND id IN ({placeholders}) ORDER BY name"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let args = std::iter::once(user_id).chain(ids.iter().copied());
        let rows = stmt.query_map(params_from_iter(args), equipment_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn workout_equipment(&self, workout_id: i64) -> StoreResult<Vec<Equipment>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.id, e.user_id, e.name, e.description, e.active
             FROM equipment e JOIN workout_equipment we ON we.equipment_id = e.id
             WHERE we.workout_id = ?1 ORDER BY e.name",
        )?;
        let rows = stmt.query_map(params![workout_id], equipment_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Saves a workout and replaces its equipment with the user's equipment
    /// among `equipment_ids`, in one transaction. On failure nothing is stored and a new workout
    /// keeps no id.
    pub fn save_workout_with_equipment(
        &self,
        workout: &mut Workout,
        equipment_ids: &[i64],
    ) -> StoreResult<()> {
        let equipment = self.equipment_by_ids(workout.user_id, equipment_ids)?;
        let is_new = workout.id.is_none();

        let tx = self.conn.unchecked_transaction()?;
        let saved = self.save_workout(workout).and_then(|()| {
            let id = workout.id.ok_or(StoreError::NotFound("workout"))?;
            link_equipment(&tx, id, &equipment)
        });

        match saved {
            Ok(()) => {
                tx.commit()?;
                workout.equipment = equipment;
                Ok(())
            }
            Err(e) => {
                if is_new {
                    workout.id = None;
                }
                Err(e)
            }
        }
    }

    // --- Administration ---

    pub fn all_users(&self) -> StoreResult<Vec<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users u JOIN profiles p ON p.user_id = u.id ORDER BY u.username"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], user_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Updates the account fields an administrator controls.
    pub fn update_user_account(
        &self,
        id: i64,
        name: &str,
        active: bool,
        admin: bool,
    ) -> StoreResult<()> {
        if name.trim().is_empty() {
            return Err(StoreError::Validation("name is required".to_string()));
        }

        let updated = self.conn.execute(
            "UPDATE users SET name = ?1, active = ?2, admin = ?3 WHERE id = ?4",
            params![name.trim(), active, admin, id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound("user"));
        }
        Ok(())
    }

    /// Removes a user with everything they own.
    pub fn delete_user(&self, id: i64) -> StoreResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    // --- Statistics ---

    /// Count and sums per workout type, most frequent first.
    pub fn totals_by_type(&self, user_id: i64) -> StoreResult<Vec<WorkoutTotals>> {
        let mut stmt = self.conn.prepare(
            "SELECT type, COUNT(*), SUM(total_distance), SUM(total_duration)
             FROM workouts
             WHERE user_id = ?1
             GROUP BY type
             ORDER BY COUNT(*) DESC, type",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            let workout_type: String = row.get(0)?;
            Ok(WorkoutTotals {
                period: None,
                workout_type: workout_type.parse().unwrap_or(WorkoutType::Other),
                count: row.get(1)?,
                distance: row.get(2)?,
                duration: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Sums of one workout type per calendar month (`YYYY-MM`), newest first.
    pub fn monthly_totals(
        &self,
        user_id: i64,
        workout_type: WorkoutType,
    ) -> StoreResult<Vec<WorkoutTotals>> {
        let mut stmt = self.conn.prepare(
            "SELECT substr(date, 1, 7) AS month, COUNT(*), SUM(total_distance), SUM(total_duration)
             FROM workouts
             WHERE user_id = ?1 AND type = ?2
             GROUP BY month
             ORDER BY month DESC",
        )?;
        let rows = stmt.query_map(params![user_id, workout_type.as_str()], |row| {
            Ok(WorkoutTotals {
                period: Some(row.get(0)?),
                workout_type,
                count: row.get(1)?,
                distance: row.get(2)?,
                duration: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn link_equipment(conn: &Connection, workout_id: i64, equipment: &[Equipment]) -> StoreResult<()> {
    conn.execute(
        "DELETE FROM workout_equipment WHERE workout_id = ?1",
        params![workout_id],
    )?;
    for e in equipment {
        let Some(equipment_id) = e.id else {
            return Err(StoreError::Validation(format!(
                "equipment {:?} is not saved",
                e.name
            )));
        };
        conn.execute(
            "INSERT INTO workout_equipment (workout_id, equipment_id) VALUES (?1, ?2)",
            params![workout_id, equipment_id],
        )?;
    }
    Ok(())
}

impl WorkoutIngestor for Database {
    fn add_workout(
        &self,
        user: &User,
        workout_type: WorkoutType,
        notes: &str,
        filename: &str,
        content: &[u8],
    ) -> anyhow::Result<Workout> {
        let parsed = parser::parse_activity(filename, content)?;

        let mut workout = Workout {
            user_id: user.id,
            name: parsed.name,
            notes: notes.to_string(),
            date: Some(parsed.date),
            workout_type: workout_type.or_detected(parsed.workout_type),
            data: Some(parsed.data),
            filename: Some(filename.to_string()),
            content: Some(content.to_vec()),
            ..Default::default()
        };

        self.save_workout(&mut workout)
            .with_context(|| format!("{}: could not save workout", filename))?;
        info!("Stored workout {:?} from {}", workout.id, filename);

        Ok(workout)
    }
}
