use anyhow::Context;
use serde_json::json;
use tokio_postgres::{Client, NoTls, Statement};

use crate::api::{BookDetails, BookDetailsPatch, BookId, BookSummary};
use crate::books_repository::{BookRepository, BookRepositoryError};

pub struct PostgresBooksRepository {
    client: Client,
}

pub struct PostgresBooksRepositoryConfig {
    pub hostname: String,
    pub username: String,
    pub password: String,
}

impl PostgresBooksRepository {
    pub async fn init(config: PostgresBooksRepositoryConfig) -> anyhow::Result<Self> {
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
        CREATE TABLE IF NOT EXISTS books (
            id              SERIAL PRIMARY KEY,
            params          JSONB
            )
        ",
            )
            .await
            .context("Failed to setup books table")?;
        Ok(Self { client })
    }

    fn row_to_summary(row: &tokio_postgres::Row) -> Result<BookSummary, BookRepositoryError> {
        let book_id = row.try_get(0)?;
        let params: serde_json::Value = row.try_get(1)?;
        let details: BookDetails = serde_json::from_value(params)?;

        Ok(BookSummary {
            book_id,
            title: details.title,
            authors: details.authors,
            total_copies: details.total_copies,
        })
    }
}

#[async_trait::async_trait]
impl BookRepository for PostgresBooksRepository {
    async fn add_book(&self, details: BookDetails) -> Result<BookId, BookRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("INSERT INTO books (params) VALUES ($1) RETURNING id")
            .await?;

        let rows = self.client.query(&stmt, &[&json!(details)]).await?;

        let book_id: BookId = rows
            .first()
            .ok_or_else(|| BookRepositoryError::Other("Id not returned".to_string()))?
            .try_get(0)?;

        Ok(book_id)
    }

    async fn update_book(
        &self,
        book_id: BookId,
        patch: BookDetailsPatch,
    ) -> Result<bool, BookRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("UPDATE books SET params = params || ($1)::JSONB WHERE id = ($2) RETURNING id")
            .await?;

        let rows = self.client.query(&stmt, &[&json!(patch), &book_id]).await?;
        Ok(!rows.is_empty())
    }

    async fn get_book(&self, book_id: BookId) -> Result<BookDetails, BookRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("SELECT params FROM books WHERE id = ($1)")
            .await?;

        let rows = self.client.query(&stmt, &[&book_id]).await?;

        let details: serde_json::Value = rows
            .first()
            .ok_or_else(|| BookRepositoryError::NotFound(book_id))?
            .try_get(0)?;

        Ok(serde_json::from_value(details)?)
    }

    async fn remove_book(&self, book_id: BookId) -> Result<bool, BookRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare("DELETE FROM books WHERE id = ($1) RETURNING id")
            .await?;

        let rows = self.client.query(&stmt, &[&book_id]).await?;
        Ok(!rows.is_empty())
    }

    async fn list_books(
        &self,
        filter: Option<String>,
    ) -> Result<Vec<BookSummary>, BookRepositoryError> {
        let rows = match filter {
            Some(filter) => {
                let stmt: Statement = self
                    .client
                    .prepare(
                        "SELECT id, params FROM books \
                         WHERE params->>'title' ILIKE '%' || $1 || '%' \
                            OR EXISTS (\
                                SELECT 1 FROM jsonb_array_elements_text(params->'authors') AS author \
                                WHERE author ILIKE '%' || $1 || '%') \
                         ORDER BY id",
                    )
                    .await?;
                self.client.query(&stmt, &[&filter]).await?
            }
            None => {
                let stmt: Statement = self
                    .client
                    .prepare("SELECT id, params FROM books ORDER BY id")
                    .await?;
                self.client.query(&stmt, &[]).await?
            }
        };

        rows.iter().map(Self::row_to_summary).collect()
    }
}

#[cfg(test)]
mod postgres_book_repository_tests {
    use serial_test::file_serial;
    use testcontainers::core::IntoContainerPort;
    use testcontainers::runners::AsyncRunner;
    use testcontainers::{ContainerAsync, GenericImage, ImageExt};

    use crate::api::{BookDetails, BookDetailsPatch};
    use crate::books_repository::{BookRepository, BookRepositoryError};

    async fn start_postgres_container_and_init_repo() -> (
        ContainerAsync<GenericImage>,
        crate::books_repository::PostgresBooksRepository,
    ) {
        let _pg_container = GenericImage::new("postgres", "latest")
            .with_mapped_port(5432, 5432.tcp())
            .with_env_var("POSTGRES_USER", "postgres")
            .with_env_var("POSTGRES_PASSWORD", "postgres")
            .start()
            .await
            .expect("Failed to start postgres");

        for _ in 0..10 {
            if let Ok(repo) = crate::books_repository::PostgresBooksRepository::init(
                crate::books_repository::PostgresBooksRepositoryConfig {
                    hostname: "127.0.0.1".to_string(),
                    username: "postgres".to_string(),
                    password: "postgres".to_string(),
                },
            )
            .await
            {
                return (_pg_container, repo);
            }
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        }
        panic!("Failed to setup postgres container")
    }

    #[tokio::test]
    #[file_serial(key, path => "../.pgtestslock")]
    /// Covers the whole catalog lifecycle against a real database
    /// Combined into one testcase to avoid starting the container multiple times
    /// 1. Gets an unknown book to check NotFound
    /// 2. Adds a book and reads it back
    /// 3. Patches the number of copies
    /// 4. Lists with a filter matching the author
    /// 5. Removes the book and checks the second removal reports false
    async fn test_catalog_lifecycle() {
        let (_container, repo) = start_postgres_container_and_init_repo().await;

        let not_existing_book_id = 20000;
        let book_not_found = repo.get_book(not_existing_book_id).await;
        assert!(matches!(
            book_not_found,
            Err(BookRepositoryError::NotFound(..))
        ));

        let book_details = BookDetails {
            title: "Les Misérables".to_string(),
            authors: vec!["Victor Hugo".to_string()],
            publisher: "PUF".to_string(),
            description: "".to_string(),
            isbn: "978-2-1234-5680-3".to_string(),
            tags: vec!["roman".to_string()],
            total_copies: 3,
        };
        let id = repo
            .add_book(book_details.clone())
            .await
            .expect("Failed to add book");

        let details = repo.get_book(id).await.expect("Failed to get book");
        assert_eq!(details, book_details);

        let patch = BookDetailsPatch {
            total_copies: Some(5),
            ..BookDetailsPatch::default()
        };
        let patched = repo.update_book(id, patch).await.expect("Failed to patch");
        assert!(patched);
        assert_eq!(repo.get_book(id).await.unwrap().total_copies, 5);

        let filtered = repo
            .list_books(Some("hugo".to_string()))
            .await
            .expect("Failed to search");
        assert!(filtered.iter().any(|summary| summary.book_id == id));

        let no_match = repo
            .list_books(Some("flaubert".to_string()))
            .await
            .expect("Failed to search");
        assert!(no_match.iter().all(|summary| summary.book_id != id));

        let removed = repo.remove_book(id).await.expect("Failed to remove");
        assert!(removed);
        let removed_again = repo.remove_book(id).await.expect("Failed to remove");
        assert!(!removed_again);
    }
}
