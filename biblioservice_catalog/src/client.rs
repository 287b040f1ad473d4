use anyhow::{bail, Context};
use reqwest::header::{AUTHORIZATION, LOCATION};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_tracing::TracingMiddleware;

use crate::api::{BookDetails, BookDetailsPatch, BookId, BookSummary, GetAllBooksResponse};

pub struct CatalogClient {
    url: String,
    client: ClientWithMiddleware,
    token: Option<String>,
}

impl CatalogClient {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .build()
            .context("Failed to build reqwest client")?;
        let client = ClientBuilder::new(reqwest_client)
            // Insert the tracing middleware
            .with(TracingMiddleware::default())
            .build();

        Ok(Self {
            url: url.to_string(),
            client,
            token: None,
        })
    }

    /// Returns a client that attaches the given bearer token to every call
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    /// Calls POST /api/livre endpoint
    /// Returns the id of the added book, parsed from the location header
    pub async fn add_book(&self, book_details: BookDetails) -> anyhow::Result<BookId> {
        let response = self
            .authorize(self.client.post(format!("{}/api/livre", self.url)))
            .json(&book_details)
            .send()
            .await?;

        if !response.status().is_success() {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to add book {}", error)
        }

        let location_header = response
            .headers()
            .get(LOCATION)
            .context("No location header")?;

        location_header
            .to_str()
            .context("Failed to convert header to str")?
            .strip_prefix("/api/livre/")
            .context("Invalid location header")?
            .parse()
            .context("Failed to parse book id")
    }

    /// Calls GET /api/livre/{book_id} endpoint
    /// Returns book details if the book was present
    /// None if the book was not in the catalog
    /// and error in case of any other failure
    pub async fn get_book(&self, book_id: BookId) -> anyhow::Result<Option<BookDetails>> {
        let response = self
            .client
            .get(format!("{}/api/livre/{}", self.url, book_id))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(None)
        } else if response.status().is_success() {
            Ok(Some(response.json().await?))
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to get book {}", error)
        }
    }

    /// Calls PATCH /api/livre/{book_id} endpoint
    /// Returns true if the book was patched and false if it was not found
    pub async fn update_book(
        &self,
        book_id: BookId,
        patch: BookDetailsPatch,
    ) -> anyhow::Result<bool> {
        let response = self
            .authorize(
                self.client
                    .patch(format!("{}/api/livre/{}", self.url, book_id)),
            )
            .json(&patch)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(false)
        } else if response.status().is_success() {
            Ok(true)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to update book {}", error)
        }
    }

    /// Calls DELETE /api/livre/{book_id} endpoint
    /// Returns true if the book was removed and false if it was not found
    pub async fn remove_book(&self, book_id: BookId) -> anyhow::Result<bool> {
        let response = self
            .authorize(
                self.client
                    .delete(format!("{}/api/livre/{}", self.url, book_id)),
            )
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(false)
        } else if response.status().is_success() {
            Ok(true)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to remove book {}", error)
        }
    }

    /// Calls GET /api/livres endpoint, optionally with a search query
    pub async fn list_books(&self, query: Option<&str>) -> anyhow::Result<Vec<BookSummary>> {
        let mut request = self.client.get(format!("{}/api/livres", self.url));
        if let Some(query) = query {
            request = request.query(&[("q", query)]);
        }
        let response = request.send().await?;
        if response.status().is_success() {
            let body: GetAllBooksResponse = response.json().await?;
            Ok(body.books)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to list books {}", error)
        }
    }
}
