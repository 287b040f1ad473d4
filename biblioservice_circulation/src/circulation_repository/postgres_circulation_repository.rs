use anyhow::Context;
use serde_json::json;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Row, Statement};

use crate::api::{
    BookId, LoanId, LoanRecord, ReservationId, ReservationRecord, ReservationStatus,
    StudentDetails, UserId,
};
use crate::circulation_repository::{
    BookUsage, CirculationRepository, CirculationRepositoryError, ExpirySweep, HoldNotice,
    ReturnOutcome, StudentRecord,
};

pub struct PostgresCirculationRepositoryConfig {
    pub hostname: String,
    pub username: String,
    pub password: String,
}

pub struct PostgresCirculationRepository {
    client: Client,
}

/// Shared projection for reservation reads. The queue rank is derived on
/// read from the stable per book positions, it is never stored
const RESERVATION_SELECT: &str = "
    SELECT r.id, r.book_id, r.user_id, r.status, r.reserved_at, r.ready_until,
           CASE WHEN r.status = 'en_attente' THEN (
               SELECT count(*) FROM reservations q
               WHERE q.book_id = r.book_id
                 AND q.status = 'en_attente'
                 AND q.position <= r.position)
           END AS queue_rank
    FROM reservations r
";

impl PostgresCirculationRepository {
    pub async fn init(config: PostgresCirculationRepositoryConfig) -> anyhow::Result<Self> {
        let connection_str = format!(
            "postgresql://{}:{}@{}",
            config.username, config.password, config.hostname
        );
        tracing::info!("Postgres connection_str: {}", connection_str);
        let (client, connection) = tokio_postgres::connect(&connection_str, NoTls)
            .await
            .context("Failed to start postgres")?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                eprintln!("connection error: {}", e);
            }
        });

        client
            .batch_execute(
                "
        CREATE TABLE IF NOT EXISTS students (
            id              SERIAL PRIMARY KEY,
            username        TEXT NOT NULL UNIQUE,
            params          JSONB
            )
        ",
            )
            .await
            .context("Failed to setup students table")?;

        client
            .batch_execute(
                "
        CREATE TABLE IF NOT EXISTS loans (
            id              SERIAL PRIMARY KEY,
            book_id         INTEGER NOT NULL,
            user_id         INTEGER NOT NULL,
            borrowed_at     BIGINT NOT NULL,
            due_at          BIGINT NOT NULL,
            returned_at     BIGINT,
            renewals        INTEGER NOT NULL DEFAULT 0
            )
        ",
            )
            .await
            .context("Failed to setup loans table")?;

        client
            .batch_execute(
                "
        CREATE TABLE IF NOT EXISTS reservations (
            id              SERIAL PRIMARY KEY,
            book_id         INTEGER NOT NULL,
            user_id         INTEGER NOT NULL,
            position        INTEGER NOT NULL,
            status          TEXT NOT NULL,
            reserved_at     BIGINT NOT NULL,
            ready_until     BIGINT
            );
        CREATE UNIQUE INDEX IF NOT EXISTS reservations_active_book_user
            ON reservations (book_id, user_id)
            WHERE status IN ('en_attente', 'prete')
        ",
            )
            .await
            .context("Failed to setup reservations table")?;

        Ok(Self { client })
    }

    fn row_to_loan(row: &Row) -> Result<LoanRecord, CirculationRepositoryError> {
        Ok(LoanRecord {
            loan_id: row.try_get(0)?,
            book_id: row.try_get(1)?,
            user_id: row.try_get(2)?,
            borrowed_at: row.try_get(3)?,
            due_at: row.try_get(4)?,
            returned_at: row.try_get(5)?,
            renewals: row.try_get(6)?,
        })
    }

    fn row_to_reservation(row: &Row) -> Result<ReservationRecord, CirculationRepositoryError> {
        let status: String = row.try_get(3)?;
        let status = ReservationStatus::parse(&status).ok_or_else(|| {
            CirculationRepositoryError::Other(format!("Unknown reservation status {}", status))
        })?;
        Ok(ReservationRecord {
            reservation_id: row.try_get(0)?,
            book_id: row.try_get(1)?,
            user_id: row.try_get(2)?,
            status,
            reserved_at: row.try_get(4)?,
            ready_until: row.try_get(5)?,
            queue_rank: row.try_get(6)?,
        })
    }

    async fn classify_failed_loan_update(
        &self,
        loan_id: LoanId,
        max_renewals: Option<i32>,
    ) -> CirculationRepositoryError {
        let stmt = match self
            .client
            .prepare(
                "SELECT id, book_id, user_id, borrowed_at, due_at, returned_at, renewals \
                 FROM loans WHERE id = $1",
            )
            .await
        {
            Ok(stmt) => stmt,
            Err(err) => return err.into(),
        };
        let rows = match self.client.query(&stmt, &[&loan_id]).await {
            Ok(rows) => rows,
            Err(err) => return err.into(),
        };
        let loan = match rows.first().map(Self::row_to_loan) {
            Some(Ok(loan)) => loan,
            Some(Err(err)) => return err,
            None => return CirculationRepositoryError::LoanNotFound(loan_id),
        };
        if loan.returned_at.is_some() {
            return CirculationRepositoryError::LoanAlreadyReturned(loan_id);
        }
        if let Some(max_renewals) = max_renewals {
            if loan.renewals >= max_renewals {
                return CirculationRepositoryError::RenewalLimitReached(loan_id);
            }
            return CirculationRepositoryError::BookWantedByQueue(loan.book_id);
        }
        CirculationRepositoryError::Other(format!("Loan {} update rejected", loan_id))
    }
}

#[async_trait::async_trait]
impl CirculationRepository for PostgresCirculationRepository {
    async fn add_student(
        &self,
        record: StudentRecord,
    ) -> Result<UserId, CirculationRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("INSERT INTO students (username, params) VALUES ($1, $2) RETURNING id")
            .await?;

        let rows = self
            .client
            .query(&stmt, &[&record.username, &json!(record)])
            .await;

        match rows {
            Ok(rows) => {
                let user_id: UserId = rows
                    .first()
                    .ok_or_else(|| {
                        CirculationRepositoryError::Other("Id not returned".to_string())
                    })?
                    .try_get(0)?;
                Ok(user_id)
            }
            Err(err)
                if err
                    .as_db_error()
                    // This is unique constraint validation error
                    .map(|db_err| db_err.code() == &SqlState::from_code("23505"))
                    .unwrap_or_default() =>
            {
                Err(CirculationRepositoryError::UsernameTaken(record.username))
            }
            Err(other_err) => Err(other_err.into()),
        }
    }

    async fn get_student(&self, id: UserId) -> Result<StudentDetails, CirculationRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("SELECT params FROM students WHERE id = ($1)")
            .await?;

        let rows = self.client.query(&stmt, &[&id]).await?;

        let params: serde_json::Value = rows
            .first()
            .ok_or(CirculationRepositoryError::StudentNotFound(id))?
            .try_get(0)?;
        let record: StudentRecord = serde_json::from_value(params)?;

        Ok(record.details())
    }

    async fn get_student_by_username(
        &self,
        username: String,
    ) -> Result<Option<(UserId, StudentRecord)>, CirculationRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("SELECT id, params FROM students WHERE username = ($1)")
            .await?;

        let rows = self.client.query(&stmt, &[&username]).await?;

        rows.first()
            .map(|row| {
                let user_id: UserId = row.try_get(0)?;
                let params: serde_json::Value = row.try_get(1)?;
                let record: StudentRecord = serde_json::from_value(params)?;
                Ok((user_id, record))
            })
            .transpose()
    }

    async fn get_all_student_ids(&self) -> Result<Vec<UserId>, CirculationRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("SELECT id FROM students ORDER BY id")
            .await?;
        let rows = self.client.query(&stmt, &[]).await?;
        rows.iter().map(|row| Ok(row.try_get(0)?)).collect()
    }

    async fn remove_student(
        &self,
        id: UserId,
        hold_deadline: i64,
    ) -> Result<(), CirculationRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("SELECT 1 FROM loans WHERE user_id = $1 AND returned_at IS NULL LIMIT 1")
            .await?;
        if !self.client.query(&stmt, &[&id]).await?.is_empty() {
            return Err(CirculationRepositoryError::StudentHasActiveLoans(id));
        }

        let stmt: Statement = self
            .client
            .prepare("DELETE FROM students WHERE id = $1 RETURNING id")
            .await?;
        if self.client.query(&stmt, &[&id]).await?.is_empty() {
            return Err(CirculationRepositoryError::StudentNotFound(id));
        }

        // drop the student's place in every queue; freed ready holds are
        // handed to the next student in line within the same statement
        let stmt: Statement = self
            .client
            .prepare(
                "
            WITH cancelled AS (
                UPDATE reservations r SET status = 'annulee', ready_until = NULL
                FROM reservations old
                WHERE r.id = old.id
                  AND r.user_id = $1
                  AND r.status IN ('en_attente', 'prete')
                RETURNING r.book_id, old.status AS previous_status
            ),
            promoted AS (
                UPDATE reservations SET status = 'prete', ready_until = $2
                WHERE id IN (
                    SELECT DISTINCT ON (candidate.book_id) candidate.id
                    FROM reservations candidate
                    JOIN cancelled ON candidate.book_id = cancelled.book_id
                    WHERE cancelled.previous_status = 'prete'
                      AND candidate.status = 'en_attente'
                    ORDER BY candidate.book_id, candidate.position
                )
                RETURNING id
            )
            SELECT count(*) FROM cancelled
            ",
            )
            .await?;
        self.client.query(&stmt, &[&id, &hold_deadline]).await?;

        Ok(())
    }

    async fn open_loan(
        &self,
        user_id: UserId,
        book_id: BookId,
        borrowed_at: i64,
        due_at: i64,
        total_copies: i32,
    ) -> Result<LoanId, CirculationRepositoryError> {
        // a ready hold of this student is consumed by the same statement that
        // opens the loan; without one, the insert only passes while a copy is
        // free after open loans and foreign ready holds are accounted for
        let stmt: Statement = self
            .client
            .prepare(
                "
            WITH ready_hold AS (
                UPDATE reservations SET status = 'transformee', ready_until = NULL
                WHERE book_id = $1 AND user_id = $2 AND status = 'prete'
                  AND NOT EXISTS (
                      SELECT 1 FROM loans
                      WHERE book_id = $1 AND user_id = $2 AND returned_at IS NULL)
                RETURNING id
            )
            INSERT INTO loans (book_id, user_id, borrowed_at, due_at)
            SELECT $1, $2, $3, $4
            WHERE NOT EXISTS (
                    SELECT 1 FROM loans
                    WHERE book_id = $1 AND user_id = $2 AND returned_at IS NULL)
              AND (
                    (SELECT count(*) FROM ready_hold) > 0
                    OR (SELECT count(*) FROM loans
                        WHERE book_id = $1 AND returned_at IS NULL)
                       + (SELECT count(*) FROM reservations
                          WHERE book_id = $1 AND status = 'prete')
                       < $5
              )
            RETURNING id
            ",
            )
            .await?;

        let rows = self
            .client
            .query(
                &stmt,
                &[
                    &book_id,
                    &user_id,
                    &borrowed_at,
                    &due_at,
                    &(total_copies as i64),
                ],
            )
            .await?;

        match rows.first() {
            Some(row) => Ok(row.try_get(0)?),
            None => {
                let stmt: Statement = self
                    .client
                    .prepare(
                        "SELECT 1 FROM loans \
                         WHERE book_id = $1 AND user_id = $2 AND returned_at IS NULL",
                    )
                    .await?;
                if !self.client.query(&stmt, &[&book_id, &user_id]).await?.is_empty() {
                    Err(CirculationRepositoryError::LoanAlreadyOpen(user_id, book_id))
                } else {
                    Err(CirculationRepositoryError::NoCopyAvailable(book_id))
                }
            }
        }
    }

    async fn close_loan(
        &self,
        loan_id: LoanId,
        returned_at: i64,
        hold_deadline: i64,
    ) -> Result<ReturnOutcome, CirculationRepositoryError> {
        // return and promotion of the queue head are one atomic statement
        let stmt: Statement = self
            .client
            .prepare(
                "
            WITH returned AS (
                UPDATE loans SET returned_at = $2
                WHERE id = $1 AND returned_at IS NULL
                RETURNING book_id
            ),
            promoted AS (
                UPDATE reservations SET status = 'prete', ready_until = $3
                WHERE id = (
                    SELECT id FROM reservations
                    WHERE book_id IN (SELECT book_id FROM returned)
                      AND status = 'en_attente'
                    ORDER BY position
                    LIMIT 1
                )
                RETURNING id, user_id, book_id
            )
            SELECT returned.book_id,
                   (SELECT id FROM promoted),
                   (SELECT user_id FROM promoted)
            FROM returned
            ",
            )
            .await?;

        let rows = self
            .client
            .query(&stmt, &[&loan_id, &returned_at, &hold_deadline])
            .await?;

        match rows.first() {
            Some(row) => {
                let book_id: BookId = row.try_get(0)?;
                let promoted_id: Option<ReservationId> = row.try_get(1)?;
                let promoted_user: Option<UserId> = row.try_get(2)?;
                let promoted = match (promoted_id, promoted_user) {
                    (Some(reservation_id), Some(user_id)) => Some(HoldNotice {
                        reservation_id,
                        user_id,
                        book_id,
                    }),
                    _ => None,
                };
                Ok(ReturnOutcome { book_id, promoted })
            }
            None => Err(self.classify_failed_loan_update(loan_id, None).await),
        }
    }

    async fn renew_loan(
        &self,
        loan_id: LoanId,
        extension_seconds: i64,
        max_renewals: i32,
    ) -> Result<i64, CirculationRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "
            UPDATE loans
            SET due_at = due_at + $2, renewals = renewals + 1
            WHERE id = $1
              AND returned_at IS NULL
              AND renewals < $3
              AND NOT EXISTS (
                    SELECT 1 FROM reservations
                    WHERE book_id = loans.book_id
                      AND status IN ('en_attente', 'prete'))
            RETURNING due_at
            ",
            )
            .await?;

        let rows = self
            .client
            .query(&stmt, &[&loan_id, &extension_seconds, &max_renewals])
            .await?;

        match rows.first() {
            Some(row) => Ok(row.try_get(0)?),
            None => Err(self
                .classify_failed_loan_update(loan_id, Some(max_renewals))
                .await),
        }
    }

    async fn get_loan(&self, loan_id: LoanId) -> Result<LoanRecord, CirculationRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT id, book_id, user_id, borrowed_at, due_at, returned_at, renewals \
                 FROM loans WHERE id = $1",
            )
            .await?;
        let rows = self.client.query(&stmt, &[&loan_id]).await?;
        rows.first()
            .map(Self::row_to_loan)
            .unwrap_or(Err(CirculationRepositoryError::LoanNotFound(loan_id)))
    }

    async fn list_active_loans(
        &self,
        user_id: UserId,
    ) -> Result<Vec<LoanRecord>, CirculationRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT id, book_id, user_id, borrowed_at, due_at, returned_at, renewals \
                 FROM loans WHERE user_id = $1 AND returned_at IS NULL ORDER BY id",
            )
            .await?;
        let rows = self.client.query(&stmt, &[&user_id]).await?;
        rows.iter().map(Self::row_to_loan).collect()
    }

    async fn list_all_active_loans(&self) -> Result<Vec<LoanRecord>, CirculationRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT id, book_id, user_id, borrowed_at, due_at, returned_at, renewals \
                 FROM loans WHERE returned_at IS NULL ORDER BY id",
            )
            .await?;
        let rows = self.client.query(&stmt, &[]).await?;
        rows.iter().map(Self::row_to_loan).collect()
    }

    async fn list_loan_history(
        &self,
        user_id: UserId,
    ) -> Result<Vec<LoanRecord>, CirculationRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT id, book_id, user_id, borrowed_at, due_at, returned_at, renewals \
                 FROM loans WHERE user_id = $1 AND returned_at IS NOT NULL ORDER BY id",
            )
            .await?;
        let rows = self.client.query(&stmt, &[&user_id]).await?;
        rows.iter().map(Self::row_to_loan).collect()
    }

    async fn count_active_loans(
        &self,
        user_id: UserId,
    ) -> Result<i64, CirculationRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("SELECT count(*) FROM loans WHERE user_id = $1 AND returned_at IS NULL")
            .await?;
        let rows = self.client.query(&stmt, &[&user_id]).await?;
        Ok(rows
            .first()
            .ok_or_else(|| CirculationRepositoryError::Other("Count not returned".to_string()))?
            .try_get(0)?)
    }

    async fn book_usage(&self, book_id: BookId) -> Result<BookUsage, CirculationRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "
            SELECT (SELECT count(*) FROM loans
                    WHERE book_id = $1 AND returned_at IS NULL) AS active_loans,
                   (SELECT count(*) FROM reservations
                    WHERE book_id = $1 AND status = 'prete') AS ready_holds
            ",
            )
            .await?;
        let rows = self.client.query(&stmt, &[&book_id]).await?;
        let row = rows
            .first()
            .ok_or_else(|| CirculationRepositoryError::Other("Usage not returned".to_string()))?;
        Ok(BookUsage {
            active_loans: row.try_get(0)?,
            ready_holds: row.try_get(1)?,
        })
    }

    async fn add_reservation(
        &self,
        user_id: UserId,
        book_id: BookId,
        reserved_at: i64,
    ) -> Result<(ReservationId, i64), CirculationRepositoryError> {
        // the position is a monotone per book sequence; the partial unique
        // index rejects a second active reservation of the same student
        let stmt: Statement = self
            .client
            .prepare(
                "
            WITH next_position AS (
                SELECT COALESCE(MAX(position), 0) + 1 AS position
                FROM reservations WHERE book_id = $1
            ),
            inserted AS (
                INSERT INTO reservations (book_id, user_id, position, status, reserved_at)
                SELECT $1, $2, next_position.position, 'en_attente', $3 FROM next_position
                RETURNING id, position
            )
            SELECT inserted.id,
                   (SELECT count(*) FROM reservations
                    WHERE book_id = $1
                      AND status = 'en_attente'
                      AND position < inserted.position) + 1 AS queue_rank
            FROM inserted
            ",
            )
            .await?;

        let rows = self
            .client
            .query(&stmt, &[&book_id, &user_id, &reserved_at])
            .await;

        match rows {
            Ok(rows) => {
                let row = rows.first().ok_or_else(|| {
                    CirculationRepositoryError::Other("Reservation not returned".to_string())
                })?;
                Ok((row.try_get(0)?, row.try_get(1)?))
            }
            Err(err)
                if err
                    .as_db_error()
                    // This is unique constraint validation error
                    .map(|db_err| db_err.code() == &SqlState::from_code("23505"))
                    .unwrap_or_default() =>
            {
                Err(CirculationRepositoryError::AlreadyReserved(user_id, book_id))
            }
            Err(other_err) => Err(other_err.into()),
        }
    }

    async fn cancel_reservation(
        &self,
        user_id: UserId,
        reservation_id: ReservationId,
        hold_deadline: i64,
    ) -> Result<Option<HoldNotice>, CirculationRepositoryError> {
        // cancelling a ready hold frees a copy, so the next student in the
        // queue is promoted by the same statement
        let stmt: Statement = self
            .client
            .prepare(
                "
            WITH cancelled AS (
                UPDATE reservations r SET status = 'annulee', ready_until = NULL
                FROM reservations old
                WHERE r.id = old.id
                  AND r.id = $1
                  AND r.user_id = $2
                  AND r.status IN ('en_attente', 'prete')
                RETURNING r.book_id, old.status AS previous_status
            ),
            promoted AS (
                UPDATE reservations SET status = 'prete', ready_until = $3
                WHERE id = (
                    SELECT candidate.id
                    FROM reservations candidate
                    JOIN cancelled ON candidate.book_id = cancelled.book_id
                    WHERE cancelled.previous_status = 'prete'
                      AND candidate.status = 'en_attente'
                    ORDER BY candidate.position
                    LIMIT 1
                )
                RETURNING id, user_id, book_id
            )
            SELECT (SELECT count(*) FROM cancelled),
                   (SELECT id FROM promoted),
                   (SELECT user_id FROM promoted),
                   (SELECT book_id FROM promoted)
            ",
            )
            .await?;

        let rows = self
            .client
            .query(&stmt, &[&reservation_id, &user_id, &hold_deadline])
            .await?;

        let row = rows.first().ok_or_else(|| {
            CirculationRepositoryError::Other("Cancellation not returned".to_string())
        })?;
        let cancelled_count: i64 = row.try_get(0)?;
        if cancelled_count == 0 {
            return Err(CirculationRepositoryError::ReservationNotFound(
                reservation_id,
            ));
        }

        let promoted_id: Option<ReservationId> = row.try_get(1)?;
        let promoted = match promoted_id {
            Some(id) => Some(HoldNotice {
                reservation_id: id,
                user_id: row.try_get(2)?,
                book_id: row.try_get(3)?,
            }),
            None => None,
        };
        Ok(promoted)
    }

    async fn list_reservations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ReservationRecord>, CirculationRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(&format!(
                "{} WHERE r.user_id = $1 AND r.status IN ('en_attente', 'prete') \
                 ORDER BY r.reserved_at",
                RESERVATION_SELECT
            ))
            .await?;
        let rows = self.client.query(&stmt, &[&user_id]).await?;
        rows.iter().map(Self::row_to_reservation).collect()
    }

    async fn list_queue_for_book(
        &self,
        book_id: BookId,
    ) -> Result<Vec<ReservationRecord>, CirculationRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(&format!(
                "{} WHERE r.book_id = $1 AND r.status IN ('en_attente', 'prete') \
                 ORDER BY (r.status = 'prete') DESC, r.position",
                RESERVATION_SELECT
            ))
            .await?;
        let rows = self.client.query(&stmt, &[&book_id]).await?;
        rows.iter().map(Self::row_to_reservation).collect()
    }

    async fn expire_ready_holds(
        &self,
        now: i64,
        hold_deadline: i64,
    ) -> Result<ExpirySweep, CirculationRepositoryError> {
        // every hold past its deadline expires, and each freed copy promotes
        // one queued reservation of the same book, all in one statement
        let stmt: Statement = self
            .client
            .prepare(
                "
            WITH expired AS (
                UPDATE reservations SET status = 'expiree', ready_until = NULL
                WHERE status = 'prete'
                  AND ready_until IS NOT NULL
                  AND ready_until < $1
                RETURNING id, book_id
            ),
            promoted AS (
                UPDATE reservations SET status = 'prete', ready_until = $2
                WHERE id IN (
                    SELECT ranked.id
                    FROM (
                        SELECT candidate.id, candidate.book_id,
                               row_number() OVER (
                                   PARTITION BY candidate.book_id
                                   ORDER BY candidate.position) AS queue_rank
                        FROM reservations candidate
                        WHERE candidate.status = 'en_attente'
                          AND candidate.book_id IN (SELECT book_id FROM expired)
                    ) ranked
                    JOIN (
                        SELECT book_id, count(*) AS freed
                        FROM expired GROUP BY book_id
                    ) freed_by_book ON freed_by_book.book_id = ranked.book_id
                    WHERE ranked.queue_rank <= freed_by_book.freed
                )
                RETURNING id, user_id, book_id
            )
            SELECT (SELECT count(*) FROM expired),
                   promoted.id, promoted.user_id, promoted.book_id
            FROM (SELECT 1) AS singleton
            LEFT JOIN promoted ON TRUE
            ",
            )
            .await?;

        let rows = self.client.query(&stmt, &[&now, &hold_deadline]).await?;

        let expired: i64 = rows
            .first()
            .ok_or_else(|| CirculationRepositoryError::Other("Sweep not returned".to_string()))?
            .try_get(0)?;

        let mut promoted = Vec::new();
        for row in &rows {
            let reservation_id: Option<ReservationId> = row.try_get(1)?;
            if let Some(reservation_id) = reservation_id {
                promoted.push(HoldNotice {
                    reservation_id,
                    user_id: row.try_get(2)?,
                    book_id: row.try_get(3)?,
                });
            }
        }

        Ok(ExpirySweep {
            expired: expired as u64,
            promoted,
        })
    }
}

#[cfg(test)]
mod tests_postgres_circulation_repository {
    use serial_test::file_serial;
    use testcontainers::core::IntoContainerPort;
    use testcontainers::runners::AsyncRunner;
    use testcontainers::{ContainerAsync, GenericImage, ImageExt};

    use super::*;

    async fn start_postgres_container_and_init_repo(
    ) -> (ContainerAsync<GenericImage>, PostgresCirculationRepository) {
        let _pg_container = GenericImage::new("postgres", "latest")
            .with_mapped_port(5432, 5432.tcp())
            .with_env_var("POSTGRES_USER", "postgres")
            .with_env_var("POSTGRES_PASSWORD", "postgres")
            .start()
            .await
            .expect("Failed to start postgres");

        for _ in 0..10 {
            if let Ok(repo) =
                PostgresCirculationRepository::init(PostgresCirculationRepositoryConfig {
                    hostname: "127.0.0.1".to_string(),
                    username: "postgres".to_string(),
                    password: "postgres".to_string(),
                })
                .await
            {
                return (_pg_container, repo);
            }
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        }
        panic!("Failed to setup postgres container")
    }

    fn student(username: &str) -> StudentRecord {
        StudentRecord {
            username: username.to_string(),
            email: format!("{}@univ.example", username),
            password_hash: "$2b$12$fakefakefakefakefakefake".to_string(),
            role: "etudiant".to_string(),
        }
    }

    #[tokio::test]
    #[file_serial(key, path => "../.pgtestslock")]
    /// Covers student management against a real database
    /// Combined into big unit test to avoid duplicate setup
    /// 1. Creates a student, reads it back by id and username
    /// 2. Rejects a duplicate username
    /// 3. Unknown student lookups report not found
    /// 4. Removal works and a second removal fails
    async fn test_student_management() {
        let (_container, repository) = start_postgres_container_and_init_repo().await;

        assert_eq!(
            repository.get_all_student_ids().await.unwrap(),
            Vec::<UserId>::default()
        );

        let record = student("amelie");
        let user_id = repository.add_student(record.clone()).await.unwrap();

        assert_eq!(
            repository.get_student(user_id).await.unwrap(),
            record.details()
        );
        assert_eq!(
            repository
                .get_student_by_username("amelie".to_string())
                .await
                .unwrap(),
            Some((user_id, record))
        );

        let taken = repository.add_student(student("amelie")).await;
        assert!(matches!(
            taken,
            Err(CirculationRepositoryError::UsernameTaken(..))
        ));

        let unknown = repository.get_student(user_id + 100).await;
        assert!(matches!(
            unknown,
            Err(CirculationRepositoryError::StudentNotFound(..))
        ));

        repository.remove_student(user_id, 0).await.unwrap();
        let remove_again = repository.remove_student(user_id, 0).await;
        assert!(matches!(
            remove_again,
            Err(CirculationRepositoryError::StudentNotFound(..))
        ));
    }

    #[tokio::test]
    #[file_serial(key, path => "../.pgtestslock")]
    /// Covers the loan lifecycle and the reservation queue end to end
    /// Combined into big unit test to avoid duplicate setup
    /// 1. Student borrows the only copy, duplicates and a second borrower are rejected
    /// 2. Two students queue up with ranks 1 and 2
    /// 3. Renewal is refused while the queue is non empty
    /// 4. Return atomically promotes the queue head to ready
    /// 5. The holder converts the hold into a loan, others still cannot borrow
    /// 6. Expiry sweep expires a stale hold and promotes the next student
    async fn test_loans_and_reservation_queue() {
        let (_container, repository) = start_postgres_container_and_init_repo().await;

        let user_1 = repository.add_student(student("user1")).await.unwrap();
        let user_2 = repository.add_student(student("user2")).await.unwrap();
        let user_3 = repository.add_student(student("user3")).await.unwrap();

        let book_id: BookId = 42;
        let loan_id = repository
            .open_loan(user_1, book_id, 1_000, 2_000, 1)
            .await
            .unwrap();

        let twice = repository.open_loan(user_1, book_id, 1_000, 2_000, 1).await;
        assert!(matches!(
            twice,
            Err(CirculationRepositoryError::LoanAlreadyOpen(..))
        ));
        let no_copy = repository.open_loan(user_2, book_id, 1_000, 2_000, 1).await;
        assert!(matches!(
            no_copy,
            Err(CirculationRepositoryError::NoCopyAvailable(..))
        ));

        let (res_2, rank_2) = repository
            .add_reservation(user_2, book_id, 1_100)
            .await
            .unwrap();
        assert_eq!(rank_2, 1);
        let (_res_3, rank_3) = repository
            .add_reservation(user_3, book_id, 1_200)
            .await
            .unwrap();
        assert_eq!(rank_3, 2);

        let duplicate = repository.add_reservation(user_2, book_id, 1_300).await;
        assert!(matches!(
            duplicate,
            Err(CirculationRepositoryError::AlreadyReserved(..))
        ));

        let renew_blocked = repository.renew_loan(loan_id, 500, 5).await;
        assert!(matches!(
            renew_blocked,
            Err(CirculationRepositoryError::BookWantedByQueue(..))
        ));

        let outcome = repository.close_loan(loan_id, 1_500, 5_000).await.unwrap();
        assert_eq!(outcome.book_id, book_id);
        let promoted = outcome.promoted.expect("queue head must be promoted");
        assert_eq!(promoted.reservation_id, res_2);
        assert_eq!(promoted.user_id, user_2);

        let return_twice = repository.close_loan(loan_id, 1_600, 5_000).await;
        assert!(matches!(
            return_twice,
            Err(CirculationRepositoryError::LoanAlreadyReturned(..))
        ));

        // the held copy stays unavailable to everyone but the holder
        let usage = repository.book_usage(book_id).await.unwrap();
        assert_eq!(usage.active_loans, 0);
        assert_eq!(usage.ready_holds, 1);
        let not_the_holder = repository.open_loan(user_3, book_id, 1_700, 2_700, 1).await;
        assert!(matches!(
            not_the_holder,
            Err(CirculationRepositoryError::NoCopyAvailable(..))
        ));

        let loan_2 = repository
            .open_loan(user_2, book_id, 1_800, 2_800, 1)
            .await
            .unwrap();
        assert_eq!(
            repository
                .list_reservations_for_user(user_2)
                .await
                .unwrap(),
            vec![]
        );

        let outcome = repository.close_loan(loan_2, 1_900, 2_500).await.unwrap();
        assert_eq!(outcome.promoted.unwrap().user_id, user_3);

        // sweep before the deadline leaves the hold alone
        let early_sweep = repository.expire_ready_holds(2_400, 9_000).await.unwrap();
        assert_eq!(early_sweep.expired, 0);

        // past the deadline the hold expires; the queue is empty so nothing
        // gets promoted
        let sweep = repository.expire_ready_holds(2_600, 9_000).await.unwrap();
        assert_eq!(sweep.expired, 1);
        assert_eq!(sweep.promoted, vec![]);

        assert_eq!(
            repository
                .list_reservations_for_user(user_3)
                .await
                .unwrap(),
            vec![]
        );
        assert_eq!(repository.list_queue_for_book(book_id).await.unwrap(), vec![]);

        let history = repository.list_loan_history(user_1).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].returned_at, Some(1_500));
    }
}
