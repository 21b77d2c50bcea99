// Database access layer (SQLite via sqlx).

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::elo::STARTING_ELO;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Character {
    pub id: i64,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub elo: i32,
    pub wins: i32,
    pub losses: i32,
    pub created_at: String,
}

/// Immutable record of one resolved battle.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Battle {
    pub id: i64,
    pub a_id: i64,
    pub b_id: i64,
    pub winner_id: Option<i64>,
    pub reason: String,
    pub log: String,
    pub created_at: String,
}

/// Battle joined with both participants' names, for record listings.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BattleRecord {
    pub id: i64,
    pub a_id: i64,
    pub b_id: i64,
    pub winner_id: Option<i64>,
    pub reason: String,
    pub log: String,
    pub created_at: String,
    pub a_name: String,
    pub b_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Admin {
    pub id: i64,
    pub name: String,
    pub password_hash: String,
    pub created_at: String,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS characters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL,
                password_hash TEXT,
                elo INTEGER NOT NULL DEFAULT 1000,
                wins INTEGER NOT NULL DEFAULT 0,
                losses INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS battles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                a_id INTEGER NOT NULL REFERENCES characters(id) ON DELETE CASCADE,
                b_id INTEGER NOT NULL REFERENCES characters(id) ON DELETE CASCADE,
                winner_id INTEGER NULL REFERENCES characters(id) ON DELETE SET NULL,
                reason TEXT NOT NULL,
                log TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                CHECK (a_id <> b_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_battles_created_at ON battles (created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        // At most one battle per unordered pair, whichever order the
        // participants were stored in.
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_battles_pair_unique
                ON battles (min(a_id, b_id), max(a_id, b_id))
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS admins (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── Character CRUD ────────────────────────────────────────────────

    pub async fn create_character(
        &self,
        name: &str,
        description: &str,
        password_hash: &str,
    ) -> Result<Character, sqlx::Error> {
        let row = sqlx::query_as::<_, Character>(
            "INSERT INTO characters (name, description, password_hash) VALUES (?, ?, ?) \
             RETURNING id, name, description, password_hash, elo, wins, losses, created_at",
        )
        .bind(name)
        .bind(description)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_character(&self, id: i64) -> Result<Option<Character>, sqlx::Error> {
        let row = sqlx::query_as::<_, Character>(
            "SELECT id, name, description, password_hash, elo, wins, losses, created_at \
             FROM characters WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_character_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Character>, sqlx::Error> {
        let row = sqlx::query_as::<_, Character>(
            "SELECT id, name, description, password_hash, elo, wins, losses, created_at \
             FROM characters WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_characters(&self) -> Result<Vec<Character>, sqlx::Error> {
        let rows = sqlx::query_as::<_, Character>(
            "SELECT id, name, description, password_hash, elo, wins, losses, created_at \
             FROM characters ORDER BY id DESC LIMIT 200",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn leaderboard(&self) -> Result<Vec<Character>, sqlx::Error> {
        let rows = sqlx::query_as::<_, Character>(
            "SELECT id, name, description, password_hash, elo, wins, losses, created_at \
             FROM characters ORDER BY elo DESC, wins DESC LIMIT 50",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ── Battle workflow queries ───────────────────────────────────────

    /// Unix epoch of the character's most recent battle, either side.
    pub async fn last_battle_epoch(&self, character_id: i64) -> Result<Option<i64>, sqlx::Error> {
        let epoch: Option<i64> = sqlx::query_scalar(
            "SELECT CAST(strftime('%s', created_at) AS INTEGER) FROM battles \
             WHERE a_id = ? OR b_id = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(character_id)
        .bind(character_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(epoch)
    }

    /// One uniformly random opponent the character has never battled.
    /// `None` when every other character already shares a battle row.
    pub async fn pick_opponent(&self, character_id: i64) -> Result<Option<Character>, sqlx::Error> {
        let row = sqlx::query_as::<_, Character>(
            r#"
            SELECT c.id, c.name, c.description, c.password_hash, c.elo, c.wins, c.losses, c.created_at
            FROM characters c
            WHERE c.id <> ?1
              AND NOT EXISTS (
                  SELECT 1 FROM battles b
                  WHERE (b.a_id = ?1 AND b.b_id = c.id)
                     OR (b.a_id = c.id AND b.b_id = ?1)
              )
            ORDER BY RANDOM()
            LIMIT 1
        "#,
        )
        .bind(character_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Apply a resolved battle as one atomic unit: both rating updates
    /// plus the battle insert commit together or not at all. A duplicate
    /// unordered pair fails the unique index and rolls everything back.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_battle(
        &self,
        a_id: i64,
        b_id: i64,
        winner_id: i64,
        winner_elo: i32,
        loser_id: i64,
        loser_elo: i32,
        reason: &str,
        log: &str,
    ) -> Result<Battle, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE characters SET elo = ?, wins = wins + 1 WHERE id = ?")
            .bind(winner_elo)
            .bind(winner_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE characters SET elo = ?, losses = losses + 1 WHERE id = ?")
            .bind(loser_elo)
            .bind(loser_id)
            .execute(&mut *tx)
            .await?;

        let battle = sqlx::query_as::<_, Battle>(
            "INSERT INTO battles (a_id, b_id, winner_id, reason, log) VALUES (?, ?, ?, ?, ?) \
             RETURNING id, a_id, b_id, winner_id, reason, log, created_at",
        )
        .bind(a_id)
        .bind(b_id)
        .bind(winner_id)
        .bind(reason)
        .bind(log)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(battle)
    }

    /// Latest battles the character participated in, with both names.
    pub async fn battles_for_character(
        &self,
        character_id: i64,
    ) -> Result<Vec<BattleRecord>, sqlx::Error> {
        let rows = sqlx::query_as::<_, BattleRecord>(
            r#"
            SELECT b.id, b.a_id, b.b_id, b.winner_id, b.reason, b.log, b.created_at,
                   ca.name AS a_name, cb.name AS b_name
            FROM battles b
            JOIN characters ca ON ca.id = b.a_id
            JOIN characters cb ON cb.id = b.b_id
            WHERE b.a_id = ? OR b.b_id = ?
            ORDER BY b.created_at DESC
            LIMIT 100
        "#,
        )
        .bind(character_id)
        .bind(character_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ── Admin accounts ────────────────────────────────────────────────

    /// Create the bootstrap admin account if it does not exist yet.
    pub async fn ensure_admin(&self, name: &str, password_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO admins (name, password_hash) VALUES (?, ?) \
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_admin_by_name(&self, name: &str) -> Result<Option<Admin>, sqlx::Error> {
        let row = sqlx::query_as::<_, Admin>(
            "SELECT id, name, password_hash, created_at FROM admins WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ── Maintenance operations ────────────────────────────────────────

    /// Row counts for (characters, battles).
    pub async fn table_counts(&self) -> Result<(i64, i64), sqlx::Error> {
        let characters: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM characters")
            .fetch_one(&self.pool)
            .await?;
        let battles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM battles")
            .fetch_one(&self.pool)
            .await?;
        Ok((characters, battles))
    }

    /// Copy both tables into `*_backup_<yyyymmddHHMM>` tables.
    pub async fn backup_tables(&self) -> Result<Vec<String>, sqlx::Error> {
        let suffix = chrono::Utc::now().format("%Y%m%d%H%M").to_string();
        let mut created = Vec::new();
        for table in ["characters", "battles"] {
            let backup = format!("{table}_backup_{suffix}");
            // Table names cannot be bound; both parts are fixed strings.
            sqlx::query(&format!("CREATE TABLE {backup} AS SELECT * FROM {table}"))
                .execute(&self.pool)
                .await?;
            created.push(backup);
        }
        Ok(created)
    }

    pub async fn clear_battles(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM battles")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Reset every character to the starting rating and a clean record,
    /// and clear the battle history, in one transaction.
    pub async fn reset_ratings(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE characters SET elo = ?, wins = 0, losses = 0")
            .bind(STARTING_ELO)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM battles").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete all battles and characters and restart both id sequences.
    pub async fn wipe_all(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM battles").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM characters")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.reset_id_sequences().await;
        Ok(())
    }

    /// Delete all characters; battles go with them via ON DELETE CASCADE.
    pub async fn delete_all_characters(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM characters")
            .execute(&self.pool)
            .await?;
        self.reset_id_sequences().await;
        Ok(result.rows_affected())
    }

    /// Drop both tables entirely. The schema is recreated on next startup.
    pub async fn drop_all(&self) -> Result<(), sqlx::Error> {
        sqlx::query("DROP TABLE IF EXISTS battles")
            .execute(&self.pool)
            .await?;
        sqlx::query("DROP TABLE IF EXISTS characters")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_character_by_id(&self, id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM characters WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_character_by_name(&self, name: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM characters WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // sqlite_sequence only exists once an AUTOINCREMENT insert happened,
    // so a failure here just means there is nothing to reset.
    async fn reset_id_sequences(&self) {
        let _ = sqlx::query("DELETE FROM sqlite_sequence WHERE name IN ('characters', 'battles')")
            .execute(&self.pool)
            .await;
    }
}

/// Whether a store error is a uniqueness-constraint violation.
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.message().contains("UNIQUE"))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    async fn seed(db: &Database, name: &str) -> Character {
        db.create_character(name, "a test character", "hash")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_characters() {
        let db = test_db().await;

        let ares = seed(&db, "Ares").await;
        assert_eq!(ares.name, "Ares");
        assert_eq!(ares.elo, 1000);
        assert_eq!(ares.wins, 0);
        assert_eq!(ares.losses, 0);

        let boreas = seed(&db, "Boreas").await;

        let all = db.list_characters().await.unwrap();
        assert_eq!(all.len(), 2);
        // Newest first.
        assert_eq!(all[0].name, "Boreas");

        let fetched = db.get_character(ares.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "Ares");
        assert!(db.get_character(999).await.unwrap().is_none());

        let by_name = db.get_character_by_name("Boreas").await.unwrap().unwrap();
        assert_eq!(by_name.id, boreas.id);
    }

    #[tokio::test]
    async fn test_character_names_are_unique() {
        let db = test_db().await;
        seed(&db, "Ares").await;
        let err = db
            .create_character("Ares", "imposter", "hash")
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_leaderboard_ordering() {
        let db = test_db().await;
        let a = seed(&db, "A").await;
        let b = seed(&db, "B").await;
        let c = seed(&db, "C").await;

        // B beats C: B up, C down; A untouched at 1000.
        db.record_battle(b.id, c.id, b.id, 1016, c.id, 984, "elo-fallback", "log")
            .await
            .unwrap();

        let board = db.leaderboard().await.unwrap();
        assert_eq!(board[0].id, b.id);
        assert_eq!(board[1].id, a.id);
        assert_eq!(board[2].id, c.id);
    }

    #[tokio::test]
    async fn test_record_battle_is_atomic_and_applied() {
        let db = test_db().await;
        let a = seed(&db, "A").await;
        let b = seed(&db, "B").await;

        let battle = db
            .record_battle(a.id, b.id, a.id, 1016, b.id, 984, "ai-judge", "a narrative")
            .await
            .unwrap();
        assert_eq!(battle.a_id, a.id);
        assert_eq!(battle.winner_id, Some(a.id));
        assert_eq!(battle.reason, "ai-judge");

        let a = db.get_character(a.id).await.unwrap().unwrap();
        assert_eq!((a.elo, a.wins, a.losses), (1016, 1, 0));
        let b = db.get_character(b.id).await.unwrap().unwrap();
        assert_eq!((b.elo, b.wins, b.losses), (984, 0, 1));
    }

    #[tokio::test]
    async fn test_pair_unique_either_order() {
        let db = test_db().await;
        let a = seed(&db, "A").await;
        let b = seed(&db, "B").await;

        db.record_battle(a.id, b.id, a.id, 1016, b.id, 984, "elo-fallback", "log")
            .await
            .unwrap();

        // Same order.
        let err = db
            .record_battle(a.id, b.id, a.id, 1016, b.id, 984, "elo-fallback", "log")
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));

        // Swapped order hits the same unordered-pair index.
        let err = db
            .record_battle(b.id, a.id, b.id, 1016, a.id, 984, "elo-fallback", "log")
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));

        // The failed attempts rolled back: ratings unchanged after the
        // first battle, exactly one row recorded.
        let a = db.get_character(a.id).await.unwrap().unwrap();
        assert_eq!((a.elo, a.wins), (1016, 1));
        let (_, battles) = db.table_counts().await.unwrap();
        assert_eq!(battles, 1);
    }

    #[tokio::test]
    async fn test_pick_opponent_excludes_self_and_history() {
        let db = test_db().await;
        let a = seed(&db, "A").await;
        let b = seed(&db, "B").await;
        let c = seed(&db, "C").await;

        db.record_battle(a.id, b.id, a.id, 1016, b.id, 984, "elo-fallback", "log")
            .await
            .unwrap();

        // Only C is left for A.
        for _ in 0..5 {
            let pick = db.pick_opponent(a.id).await.unwrap().unwrap();
            assert_eq!(pick.id, c.id);
        }

        db.record_battle(a.id, c.id, a.id, 1030, c.id, 985, "elo-fallback", "log")
            .await
            .unwrap();

        // A has battled everyone.
        assert!(db.pick_opponent(a.id).await.unwrap().is_none());

        // B and C never battled each other, so they still match.
        let pick = db.pick_opponent(b.id).await.unwrap().unwrap();
        assert_eq!(pick.id, c.id);
    }

    #[tokio::test]
    async fn test_last_battle_epoch() {
        let db = test_db().await;
        let a = seed(&db, "A").await;
        let b = seed(&db, "B").await;

        assert!(db.last_battle_epoch(a.id).await.unwrap().is_none());

        db.record_battle(a.id, b.id, a.id, 1016, b.id, 984, "elo-fallback", "log")
            .await
            .unwrap();

        let now = chrono::Utc::now().timestamp();
        for id in [a.id, b.id] {
            let epoch = db.last_battle_epoch(id).await.unwrap().unwrap();
            assert!((now - epoch).abs() < 5);
        }
    }

    #[tokio::test]
    async fn test_battles_for_character_includes_names() {
        let db = test_db().await;
        let a = seed(&db, "A").await;
        let b = seed(&db, "B").await;
        let c = seed(&db, "C").await;

        db.record_battle(a.id, b.id, b.id, 1016, a.id, 984, "ai-judge", "b wins")
            .await
            .unwrap();
        db.record_battle(c.id, b.id, c.id, 1032, b.id, 1001, "elo-fallback", "c wins")
            .await
            .unwrap();

        let records = db.battles_for_character(b.id).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .any(|r| r.a_name == "A" && r.b_name == "B" && r.winner_id == Some(b.id)));

        let records = db.battles_for_character(a.id).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_admin_bootstrap_is_idempotent() {
        let db = test_db().await;
        db.ensure_admin("admin", "hash1").await.unwrap();
        db.ensure_admin("admin", "hash2").await.unwrap();

        let admin = db.get_admin_by_name("admin").await.unwrap().unwrap();
        // First insert wins; the second is a no-op.
        assert_eq!(admin.password_hash, "hash1");
        assert!(db.get_admin_by_name("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_ratings() {
        let db = test_db().await;
        let a = seed(&db, "A").await;
        let b = seed(&db, "B").await;
        db.record_battle(a.id, b.id, a.id, 1016, b.id, 984, "elo-fallback", "log")
            .await
            .unwrap();

        db.reset_ratings().await.unwrap();

        let a = db.get_character(a.id).await.unwrap().unwrap();
        assert_eq!((a.elo, a.wins, a.losses), (1000, 0, 0));
        let (characters, battles) = db.table_counts().await.unwrap();
        assert_eq!((characters, battles), (2, 0));
    }

    #[tokio::test]
    async fn test_wipe_and_cascade() {
        let db = test_db().await;
        let a = seed(&db, "A").await;
        let b = seed(&db, "B").await;
        db.record_battle(a.id, b.id, a.id, 1016, b.id, 984, "elo-fallback", "log")
            .await
            .unwrap();

        let deleted = db.delete_all_characters().await.unwrap();
        assert_eq!(deleted, 2);
        let (characters, battles) = db.table_counts().await.unwrap();
        // Battles cascade away with their characters.
        assert_eq!((characters, battles), (0, 0));

        // Ids restart from 1 after a wipe.
        let fresh = seed(&db, "Fresh").await;
        assert_eq!(fresh.id, 1);
    }

    #[tokio::test]
    async fn test_delete_character_cascades_battles() {
        let db = test_db().await;
        let a = seed(&db, "A").await;
        let b = seed(&db, "B").await;
        db.record_battle(a.id, b.id, a.id, 1016, b.id, 984, "elo-fallback", "log")
            .await
            .unwrap();

        assert_eq!(db.delete_character_by_name("A").await.unwrap(), 1);
        assert_eq!(db.delete_character_by_name("A").await.unwrap(), 0);

        let (characters, battles) = db.table_counts().await.unwrap();
        assert_eq!((characters, battles), (1, 0));

        assert_eq!(db.delete_character_by_id(b.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_backup_tables() {
        let db = test_db().await;
        seed(&db, "A").await;

        let backups = db.backup_tables().await.unwrap();
        assert_eq!(backups.len(), 2);
        assert!(backups[0].starts_with("characters_backup_"));
        assert!(backups[1].starts_with("battles_backup_"));
    }

    #[tokio::test]
    async fn test_clear_battles() {
        let db = test_db().await;
        let a = seed(&db, "A").await;
        let b = seed(&db, "B").await;
        db.record_battle(a.id, b.id, a.id, 1016, b.id, 984, "elo-fallback", "log")
            .await
            .unwrap();

        assert_eq!(db.clear_battles().await.unwrap(), 1);
        assert_eq!(db.clear_battles().await.unwrap(), 0);
        // Characters keep their updated ratings.
        let a = db.get_character(a.id).await.unwrap().unwrap();
        assert_eq!(a.elo, 1016);
    }
}
