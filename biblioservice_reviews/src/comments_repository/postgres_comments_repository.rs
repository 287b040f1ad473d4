use anyhow::Context;
use tokio_postgres::{Client, NoTls, Row, Statement};

use crate::api::{CommentId, CommentRecord, RatingSummary};
use crate::comments_repository::{CommentsRepository, CommentsRepositoryError, NewComment};
use biblioservice_catalog::api::BookId;

pub struct PostgresCommentsRepositoryConfig {
    pub hostname: String,
    pub username: String,
    pub password: String,
}

pub struct PostgresCommentsRepository {
    client: Client,
}

impl PostgresCommentsRepository {
    pub async fn init(config: PostgresCommentsRepositoryConfig) -> anyhow::Result<Self> {
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
        CREATE TABLE IF NOT EXISTS comments (
            id              SERIAL PRIMARY KEY,
            book_id         INTEGER NOT NULL,
            user_id         INTEGER NOT NULL,
            username        TEXT NOT NULL,
            rating          SMALLINT NOT NULL,
            body            TEXT NOT NULL,
            posted_at       BIGINT NOT NULL
            )
        ",
            )
            .await
            .context("Failed to setup comments table")?;
        Ok(Self { client })
    }

    fn row_to_comment(row: &Row) -> Result<CommentRecord, CommentsRepositoryError> {
        Ok(CommentRecord {
            comment_id: row.try_get(0)?,
            book_id: row.try_get(1)?,
            user_id: row.try_get(2)?,
            username: row.try_get(3)?,
            rating: row.try_get(4)?,
            body: row.try_get(5)?,
            posted_at: row.try_get(6)?,
        })
    }

    fn row_to_summary(row: &Row) -> Result<RatingSummary, CommentsRepositoryError> {
        Ok(RatingSummary {
            book_id: row.try_get(0)?,
            average_rating: row.try_get(1)?,
            comment_count: row.try_get(2)?,
        })
    }
}

#[async_trait::async_trait]
impl CommentsRepository for PostgresCommentsRepository {
    async fn add_comment(
        &self,
        comment: NewComment,
    ) -> Result<CommentId, CommentsRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "INSERT INTO comments (book_id, user_id, username, rating, body, posted_at) \
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
            )
            .await?;

        let rows = self
            .client
            .query(
                &stmt,
                &[
                    &comment.book_id,
                    &comment.user_id,
                    &comment.username,
                    &comment.rating,
                    &comment.body,
                    &comment.posted_at,
                ],
            )
            .await?;

        let comment_id: CommentId = rows
            .first()
            .ok_or_else(|| CommentsRepositoryError::Other("Id not returned".to_string()))?
            .try_get(0)?;
        Ok(comment_id)
    }

    async fn get_comment(
        &self,
        comment_id: CommentId,
    ) -> Result<CommentRecord, CommentsRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT id, book_id, user_id, username, rating, body, posted_at \
                 FROM comments WHERE id = $1",
            )
            .await?;
        let rows = self.client.query(&stmt, &[&comment_id]).await?;
        rows.first()
            .map(Self::row_to_comment)
            .unwrap_or(Err(CommentsRepositoryError::CommentNotFound(comment_id)))
    }

    async fn remove_comment(
        &self,
        comment_id: CommentId,
    ) -> Result<bool, CommentsRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("DELETE FROM comments WHERE id = $1 RETURNING id")
            .await?;
        let rows = self.client.query(&stmt, &[&comment_id]).await?;
        Ok(!rows.is_empty())
    }

    async fn list_for_book(
        &self,
        book_id: BookId,
    ) -> Result<Vec<CommentRecord>, CommentsRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT id, book_id, user_id, username, rating, body, posted_at \
                 FROM comments WHERE book_id = $1 ORDER BY posted_at DESC, id DESC",
            )
            .await?;
        let rows = self.client.query(&stmt, &[&book_id]).await?;
        rows.iter().map(Self::row_to_comment).collect()
    }

    async fn rating_summary(
        &self,
        book_id: BookId,
    ) -> Result<Option<RatingSummary>, CommentsRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT book_id, avg(rating)::DOUBLE PRECISION, count(*) \
                 FROM comments WHERE book_id = $1 GROUP BY book_id",
            )
            .await?;
        let rows = self.client.query(&stmt, &[&book_id]).await?;
        rows.first().map(Self::row_to_summary).transpose()
    }

    async fn list_rating_summaries(
        &self,
    ) -> Result<Vec<RatingSummary>, CommentsRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT book_id, avg(rating)::DOUBLE PRECISION, count(*) \
                 FROM comments GROUP BY book_id ORDER BY book_id",
            )
            .await?;
        let rows = self.client.query(&stmt, &[]).await?;
        rows.iter().map(Self::row_to_summary).collect()
    }
}

#[cfg(test)]
mod postgres_comments_repository_tests {
    use serial_test::file_serial;
    use testcontainers::core::IntoContainerPort;
    use testcontainers::runners::AsyncRunner;
    use testcontainers::{ContainerAsync, GenericImage, ImageExt};

    use super::*;

    async fn start_postgres_container_and_init_repo(
    ) -> (ContainerAsync<GenericImage>, PostgresCommentsRepository) {
        let _pg_container = GenericImage::new("postgres", "latest")
            .with_mapped_port(5432, 5432.tcp())
            .with_env_var("POSTGRES_USER", "postgres")
            .with_env_var("POSTGRES_PASSWORD", "postgres")
            .start()
            .await
            .expect("Failed to start postgres");

        for _ in 0..10 {
            if let Ok(repo) =
                PostgresCommentsRepository::init(PostgresCommentsRepositoryConfig {
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

    fn comment(book_id: BookId, user_id: i32, rating: i16, posted_at: i64) -> NewComment {
        NewComment {
            book_id,
            user_id,
            username: format!("user{}", user_id),
            rating,
            body: "Très bon livre".to_string(),
            posted_at,
        }
    }

    #[tokio::test]
    #[file_serial(key, path => "../.pgtestslock")]
    /// Covers the comment lifecycle against a real database
    /// Combined into one testcase to avoid starting the container multiple times
    /// 1. Adds comments to two books
    /// 2. Lists a book's comments newest first
    /// 3. Summaries average ratings per book
    /// 4. Removal works once and only once
    async fn test_comments_lifecycle() {
        let (_container, repo) = start_postgres_container_and_init_repo().await;

        assert_eq!(repo.rating_summary(1).await.unwrap(), None);

        let first = repo.add_comment(comment(1, 10, 4, 1_000)).await.unwrap();
        let second = repo.add_comment(comment(1, 11, 5, 2_000)).await.unwrap();
        repo.add_comment(comment(2, 10, 2, 1_500)).await.unwrap();

        let fetched = repo.get_comment(first).await.unwrap();
        assert_eq!(fetched.rating, 4);
        assert_eq!(fetched.username, "user10");

        let listed = repo.list_for_book(1).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].comment_id, second);
        assert_eq!(listed[1].comment_id, first);

        let summary = repo.rating_summary(1).await.unwrap().unwrap();
        assert_eq!(summary.comment_count, 2);
        assert!((summary.average_rating - 4.5).abs() < 1e-9);

        let summaries = repo.list_rating_summaries().await.unwrap();
        assert_eq!(summaries.len(), 2);

        assert!(repo.remove_comment(first).await.unwrap());
        assert!(!repo.remove_comment(first).await.unwrap());

        let unknown = repo.get_comment(first).await;
        assert!(matches!(
            unknown,
            Err(CommentsRepositoryError::CommentNotFound(..))
        ));
    }
}
