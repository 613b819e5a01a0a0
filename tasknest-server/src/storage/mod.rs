pub mod models;
pub mod schema;

use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use models::{DeviceToken, DueReminder, NewDeviceToken, NewMember, NewReminder, NewSession};
use tracing::trace;

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// The caller supplied invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool })
    }

    pub async fn seed_from_config(
        &self,
        cfg_members: &[tasknest_shared::domain::Member],
    ) -> Result<(), StorageError> {
        use schema::members;

        let pool = self.pool.clone();
        let members_owned = cfg_members.to_owned();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;

            for m in &members_owned {
                let new_member = NewMember {
                    id: &m.id,
                    display_name: &m.display_name,
                };
                diesel::insert_into(members::table)
                    .values(&new_member)
                    .on_conflict(members::id)
                    .do_update()
                    .set(members::display_name.eq(new_member.display_name))
                    .execute(&mut conn)?;
            }

            Ok(())
        })
        .await?
    }

    pub async fn member_exists(&self, member: &str) -> Result<bool, StorageError> {
        use schema::members::dsl::*;
        let pool = self.pool.clone();
        let member_id = member.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let count: i64 = members
                .filter(id.eq(&member_id))
                .count()
                .get_result(&mut conn)?;
            Ok(count > 0)
        })
        .await?
    }

    pub async fn member_display_name(&self, member: &str) -> Result<Option<String>, StorageError> {
        use schema::members::dsl as m;
        let pool = self.pool.clone();
        let member_id = member.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<String>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let row = m::members
                .filter(m::id.eq(&member_id))
                .select(models::Member::as_select())
                .first::<models::Member>(&mut conn)
                .optional()?;
            Ok(row.map(|m| m.display_name))
        })
        .await?
    }

    /// Registers (or refreshes) a push token for a user. Conflicts on the
    /// `(user_id, token)` pair update the platform and timestamp rather than
    /// inserting a second row, so re-registration is idempotent.
    pub async fn upsert_device_token(
        &self,
        user_id: &str,
        token: &str,
        platform: &str,
    ) -> Result<(), StorageError> {
        use schema::device_tokens::dsl as dt;
        if token.trim().is_empty() {
            return Err(StorageError::InvalidInput("empty push token".to_string()));
        }
        let pool = self.pool.clone();
        let user_owned = user_id.to_string();
        let token_owned = token.to_string();
        let platform_owned = platform.to_string();
        trace!(user_id = %user_owned, "upsert_device_token starting");
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let now = Utc::now().naive_utc();
            let new_row = NewDeviceToken {
                user_id: &user_owned,
                token: &token_owned,
                platform: &platform_owned,
                updated_at: now,
            };
            diesel::insert_into(dt::device_tokens)
                .values(&new_row)
                .on_conflict((dt::user_id, dt::token))
                .do_update()
                .set((dt::platform.eq(&platform_owned), dt::updated_at.eq(now)))
                .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    pub async fn list_device_tokens_for_users(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<DeviceToken>, StorageError> {
        use schema::device_tokens::dsl as dt;
        let pool = self.pool.clone();
        let users_owned = user_ids.to_vec();
        tokio::task::spawn_blocking(move || -> Result<Vec<DeviceToken>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(dt::device_tokens
                .filter(dt::user_id.eq_any(&users_owned))
                .order(dt::id.asc())
                .load::<DeviceToken>(&mut conn)?)
        })
        .await?
    }

    /// Removes one token wherever it is registered. Used when the provider
    /// reports the token permanently dead; deleting an already-deleted token
    /// is a no-op.
    pub async fn delete_device_token(&self, token: &str) -> Result<bool, StorageError> {
        use schema::device_tokens::dsl as dt;
        let pool = self.pool.clone();
        let token_owned = token.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let deleted = diesel::delete(dt::device_tokens.filter(dt::token.eq(&token_owned)))
                .execute(&mut conn)?;
            Ok(deleted > 0)
        })
        .await?
    }

    /// Removes every token a user has registered (sign-out from all devices).
    pub async fn delete_device_tokens_for_user(
        &self,
        user_id: &str,
    ) -> Result<usize, StorageError> {
        use schema::device_tokens::dsl as dt;
        let pool = self.pool.clone();
        let user_owned = user_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<usize, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(
                diesel::delete(dt::device_tokens.filter(dt::user_id.eq(&user_owned)))
                    .execute(&mut conn)?,
            )
        })
        .await?
    }

    /// Write surface for the reminder application's task store. The dispatch
    /// pipeline itself never calls this; it exists for seeding and tests.
    pub async fn insert_reminder(
        &self,
        id: &str,
        user_id: &str,
        title: &str,
        difficulty: &str,
        due_date: NaiveDate,
        status: &str,
        enabled: bool,
        created_by: Option<&str>,
    ) -> Result<(), StorageError> {
        use schema::reminders;
        let pool = self.pool.clone();
        let id = id.to_string();
        let user = user_id.to_string();
        let title = title.to_string();
        let difficulty = difficulty.to_string();
        let status = status.to_string();
        let created_by = created_by.map(|s| s.to_string());
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let rec = NewReminder {
                id: &id,
                user_id: &user,
                title: &title,
                difficulty: &difficulty,
                due_date,
                status: &status,
                enabled,
                created_by: created_by.as_deref(),
            };
            diesel::insert_into(reminders::table)
                .values(&rec)
                .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    /// Pending, enabled reminders due on the given day.
    pub async fn due_reminders_on(
        &self,
        day: NaiveDate,
    ) -> Result<Vec<DueReminder>, StorageError> {
        use schema::reminders::dsl as r;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<DueReminder>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(r::reminders
                .filter(r::status.eq("pending"))
                .filter(r::enabled.eq(true))
                .filter(r::due_date.eq(day))
                .order(r::created_at.asc())
                .select((r::id, r::user_id, r::title, r::difficulty))
                .load::<DueReminder>(&mut conn)?)
        })
        .await?
    }

    /// Pending, enabled medium/hard reminders due on the given day; feeds the
    /// advance-warning class of the scan.
    pub async fn upcoming_advance_reminders_on(
        &self,
        day: NaiveDate,
    ) -> Result<Vec<DueReminder>, StorageError> {
        use schema::reminders::dsl as r;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<DueReminder>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(r::reminders
                .filter(r::status.eq("pending"))
                .filter(r::enabled.eq(true))
                .filter(r::due_date.eq(day))
                .filter(r::difficulty.eq_any(vec![
                    tasknest_shared::domain::Difficulty::Medium.as_str(),
                    tasknest_shared::domain::Difficulty::Hard.as_str(),
                ]))
                .order(r::created_at.asc())
                .select((r::id, r::user_id, r::title, r::difficulty))
                .load::<DueReminder>(&mut conn)?)
        })
        .await?
    }

    // Session helpers for JWT inactivity windows
    pub async fn create_session(&self, jti_: &str, username_: &str) -> Result<(), StorageError> {
        use schema::sessions;
        let pool = self.pool.clone();
        let j = jti_.to_string();
        let u = username_.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let new = NewSession {
                jti: &j,
                username: &u,
            };
            diesel::insert_into(sessions::table)
                .values(&new)
                .on_conflict_do_nothing()
                .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    /// Touch session atomically, but only if it hasn't expired.
    /// Returns `true` if the session was found and updated, `false` otherwise.
    ///
    /// This combines the idle timeout check and the `last_used_at` update into
    /// a single atomic UPDATE, eliminating the race condition between checking
    /// and updating the session.
    pub async fn touch_session_with_cutoff(
        &self,
        jti_: &str,
        cutoff: chrono::NaiveDateTime,
    ) -> Result<bool, StorageError> {
        use schema::sessions::dsl::*;
        let pool = self.pool.clone();
        let j = jti_.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let now = Utc::now().naive_utc();
            let updated =
                diesel::update(sessions.filter(jti.eq(&j)).filter(last_used_at.ge(cutoff)))
                    .set(last_used_at.eq(now))
                    .execute(&mut conn)?;
            Ok(updated > 0)
        })
        .await?
    }
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency and set a busy timeout
    // Ignore the result rows; Diesel's execute is fine for PRAGMAs
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    Ok(())
}
