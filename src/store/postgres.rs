//! `Store` implementation backed by Postgres via `sqlx`.
//!
//! Uses the runtime-checked `query`/`query_as` API rather than the
//! compile-time `query!` macro family: the latter needs a reachable
//! `DATABASE_URL` (or an offline query cache) at build time, which a
//! referee binary should not require just to compile in CI. See
//! `DESIGN.md` for the full rationale.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::model::{
    Advisory, Flag, NewFlag, RoundResult, Service, ServiceState, Status, Team,
};
use crate::store::Store;

pub struct PostgresStore {
    pool: PgPool,
    capture_window_rounds: u32,
}

impl PostgresStore {
    /// Opens a connection pool. Fails on an unreachable backend (§4.C).
    pub async fn open(
        connection: &str,
        max_connections: u32,
        capture_window_rounds: u32,
    ) -> Result<Self, StoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self {
            pool,
            capture_window_rounds,
        })
    }

    /// Runs the migrations shipped in `migrations/`. Used by
    /// `tinfoilhatd --reinit` and by integration tests.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn add_team(&self, team: &Team) -> Result<(), StoreError> {
        let existing = sqlx::query("SELECT 1 FROM team WHERE subnet = $1")
            .bind(team.subnet)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(StoreError::SubnetConflict);
        }

        sqlx::query(
            r#"
            INSERT INTO team (id, name, subnet, vulnbox, netbox, use_netbox)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(team.id)
        .bind(&team.name)
        .bind(team.subnet)
        .bind(&team.vulnbox)
        .bind(&team.netbox)
        .bind(team.use_netbox)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_service(&self, service: &Service) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO service (id, name, port, checker_path, udp)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(service.id)
        .bind(&service.name)
        .bind(service.port)
        .bind(&service.checker_path)
        .bind(service.udp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_teams(&self) -> Result<Vec<Team>, StoreError> {
        let rows = sqlx::query_as::<_, Team>(
            "SELECT id, name, subnet, vulnbox, netbox, use_netbox FROM team ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_services(&self) -> Result<Vec<Service>, StoreError> {
        let rows = sqlx::query_as::<_, Service>(
            "SELECT id, name, port, checker_path, udp FROM service ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn new_round(&self, length_secs: i64) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO round (id, start_time, length_secs)
            VALUES ((SELECT COALESCE(MAX(id), 0) + 1 FROM round), $1, $2)
            RETURNING id
            "#,
        )
        .bind(Utc::now())
        .bind(length_secs)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("id")?)
    }

    async fn close_round(&self, round: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE round SET end_time = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(round)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn put_status(
        &self,
        round: i64,
        team_id: Uuid,
        service_id: Uuid,
        state: ServiceState,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO status (round, team_id, service_id, state, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(round)
        .bind(team_id)
        .bind(service_id)
        .bind(state)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_states(
        &self,
        round: i64,
        team_id: Uuid,
        service_id: Uuid,
    ) -> Result<Vec<ServiceState>, StoreError> {
        let rows = sqlx::query_as::<_, Status>(
            r#"
            SELECT id, round, team_id, service_id, state, recorded_at
            FROM status
            WHERE round = $1 AND team_id = $2 AND service_id = $3
            ORDER BY id ASC
            "#,
        )
        .bind(round)
        .bind(team_id)
        .bind(service_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|s| s.state).collect())
    }

    async fn add_flag(&self, flag: NewFlag) -> Result<Flag, StoreError> {
        let existing = sqlx::query("SELECT 1 FROM flag WHERE token = $1")
            .bind(&flag.token)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(StoreError::DuplicateToken);
        }

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO flag (id, token, round, team_id, service_id, cred)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(&flag.token)
        .bind(flag.round)
        .bind(flag.team_id)
        .bind(flag.service_id)
        .bind(&flag.cred)
        .execute(&self.pool)
        .await?;

        Ok(Flag {
            id,
            token: flag.token,
            round: flag.round,
            team_id: flag.team_id,
            service_id: flag.service_id,
            cred: flag.cred,
        })
    }

    async fn get_flag_info(&self, token: &str) -> Result<Flag, StoreError> {
        sqlx::query_as::<_, Flag>(
            "SELECT id, token, round, team_id, service_id, cred FROM flag WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::UnknownFlag)
    }

    async fn get_cred(
        &self,
        round: i64,
        team_id: Uuid,
        service_id: Uuid,
    ) -> Result<(String, Option<String>), StoreError> {
        let row = sqlx::query(
            r#"
            SELECT token, cred FROM flag
            WHERE round = $1 AND team_id = $2 AND service_id = $3
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(round)
        .bind(team_id)
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::UnknownFlag)?;
        Ok((row.try_get("token")?, row.try_get("cred")?))
    }

    async fn capture_flag(&self, flag_id: Uuid, attacker_team_id: Uuid) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let flag = sqlx::query_as::<_, Flag>(
            "SELECT id, token, round, team_id, service_id, cred FROM flag WHERE id = $1",
        )
        .bind(flag_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::UnknownFlag)?;

        if flag.team_id == attacker_team_id {
            return Err(StoreError::SelfCapture);
        }

        let current_round: i64 = sqlx::query("SELECT COALESCE(MAX(id), 0) AS id FROM round")
            .fetch_one(&mut *tx)
            .await?
            .try_get("id")?;
        if current_round.saturating_sub(flag.round) >= self.capture_window_rounds as i64 {
            return Err(StoreError::FlagExpired);
        }

        let already = sqlx::query("SELECT 1 FROM captured_flag WHERE flag_id = $1")
            .bind(flag_id)
            .fetch_optional(&mut *tx)
            .await?;
        if already.is_some() {
            return Err(StoreError::AlreadyCaptured);
        }

        // The unique index on captured_flag.flag_id is the real
        // at-most-once enforcement; the SELECT above just produces a
        // friendlier error than a bare constraint violation under race.
        sqlx::query(
            r#"
            INSERT INTO captured_flag (flag_id, attacker_team_id, timestamp)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(flag_id)
        .bind(attacker_team_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.is_unique_violation() {
                    return StoreError::AlreadyCaptured;
                }
            }
            StoreError::Database(e)
        })?;

        tx.commit().await?;
        Ok(())
    }

    async fn already_captured(&self, flag_id: Uuid) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM captured_flag WHERE flag_id = $1")
            .bind(flag_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn get_captured_flags(
        &self,
        round: i64,
        attacker_team_id: Uuid,
    ) -> Result<Vec<Flag>, StoreError> {
        let rows = sqlx::query_as::<_, Flag>(
            r#"
            SELECT f.id, f.token, f.round, f.team_id, f.service_id, f.cred
            FROM flag f
            JOIN captured_flag c ON c.flag_id = f.id
            WHERE f.round = $1 AND c.attacker_team_id = $2
            "#,
        )
        .bind(round)
        .bind(attacker_team_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn put_round_result(&self, result: RoundResult) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO round_result (team_id, round, attack_score, defence_score)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (team_id, round) DO UPDATE
            SET attack_score = EXCLUDED.attack_score, defence_score = EXCLUDED.defence_score
            "#,
        )
        .bind(result.team_id)
        .bind(result.round)
        .bind(result.attack_score)
        .bind(result.defence_score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_round_result(
        &self,
        team_id: Uuid,
        round: i64,
    ) -> Result<Option<RoundResult>, StoreError> {
        let row = sqlx::query_as::<_, RoundResult>(
            "SELECT team_id, round, attack_score, defence_score FROM round_result WHERE team_id = $1 AND round = $2",
        )
        .bind(team_id)
        .bind(round)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_all_round_results(&self) -> Result<Vec<RoundResult>, StoreError> {
        let rows = sqlx::query_as::<_, RoundResult>(
            "SELECT team_id, round, attack_score, defence_score FROM round_result",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn add_advisory(&self, advisory: Advisory) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO advisory (id, team_id, text, score, reviewed, hidden, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(advisory.id)
        .bind(advisory.team_id)
        .bind(&advisory.text)
        .bind(advisory.score)
        .bind(advisory.reviewed)
        .bind(advisory.hidden)
        .bind(advisory.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_advisories(&self, not_reviewed_only: bool) -> Result<Vec<Advisory>, StoreError> {
        let rows = if not_reviewed_only {
            sqlx::query_as::<_, Advisory>(
                r#"
                SELECT id, team_id, text, score, reviewed, hidden, timestamp
                FROM advisory WHERE reviewed = false ORDER BY timestamp
                "#,
            )
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, Advisory>(
                "SELECT id, team_id, text, score, reviewed, hidden, timestamp FROM advisory ORDER BY timestamp",
            )
            .fetch_all(&self.pool)
            .await?
        };
        Ok(rows)
    }

    async fn review_advisory(&self, id: Uuid, score: f64) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE advisory SET reviewed = true, score = $1 WHERE id = $2",
        )
        .bind(score)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn set_advisory_hidden(&self, id: Uuid, hidden: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE advisory SET hidden = $1 WHERE id = $2")
            .bind(hidden)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn capture_window_rounds(&self) -> u32 {
        self.capture_window_rounds
    }
}
