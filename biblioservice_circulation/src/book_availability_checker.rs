use anyhow::Context;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_tracing::TracingMiddleware;
use serde::Deserialize;

use crate::api::BookId;

#[derive(Debug, Deserialize)]
struct CatalogBook {
    total_copies: i32,
}

/// Asks the catalog service how many copies of a book exist.
/// Circulation owns no book data, only the catalog does
pub struct BookAvailabilityChecker {
    catalog_url: String,
    client: ClientWithMiddleware,
}

impl BookAvailabilityChecker {
    pub fn new(catalog_url: String) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .build()
            .context("Failed to build reqwest client")?;
        let client = ClientBuilder::new(reqwest_client)
            // Insert the tracing middleware
            .with(TracingMiddleware::default())
            .build();

        Ok(Self {
            catalog_url,
            client,
        })
    }

    /// Fetches the number of copies the catalog owns for the book
    /// None when the catalog does not know the book
    pub async fn fetch_total_copies(&self, book_id: BookId) -> anyhow::Result<Option<i32>> {
        let response = self
            .client
            .get(format!("{}/api/livre/{}", self.catalog_url, book_id))
            .send()
            .await
            .context("Failed to get book by id")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("Catalog responded with {}", response.status())
        }

        let book: CatalogBook = response
            .json()
            .await
            .context("Failed to parse catalog response")?;
        Ok(Some(book.total_copies))
    }
}
