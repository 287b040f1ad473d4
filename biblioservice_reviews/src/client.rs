use anyhow::{bail, Context};
use reqwest::header::{AUTHORIZATION, LOCATION};
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_tracing::TracingMiddleware;

use biblioservice_catalog::api::BookId;

use crate::api::{
    AddCommentRequest, CommentId, CommentRecord, RatingSummary, RatingsBoardResponse,
};

pub struct ReviewsClient {
    url: String,
    client: ClientWithMiddleware,
    token: Option<String>,
}

impl ReviewsClient {
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

    /// Calls POST /api/livre/{book_id}/commentaire endpoint
    /// Returns the id of the new comment from the location header
    pub async fn add_comment(
        &self,
        book_id: BookId,
        request: AddCommentRequest,
    ) -> anyhow::Result<CommentId> {
        let response = self
            .authorize(self.client.post(format!(
                "{}/api/livre/{}/commentaire",
                self.url, book_id
            )))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to add comment {}", error)
        }

        let location_header = response
            .headers()
            .get(LOCATION)
            .context("No location header")?;

        location_header
            .to_str()
            .context("Failed to convert header to str")?
            .strip_prefix("/api/commentaire/")
            .context("Invalid location header")?
            .parse()
            .context("Failed to parse comment id")
    }

    /// Calls GET /api/livre/{book_id}/commentaires endpoint
    pub async fn list_comments(&self, book_id: BookId) -> anyhow::Result<Vec<CommentRecord>> {
        let response = self
            .client
            .get(format!("{}/api/livre/{}/commentaires", self.url, book_id))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to list comments {}", error)
        }
    }

    /// Calls DELETE /api/commentaire/{comment_id} endpoint
    /// Returns true if removed and false if it was not found
    pub async fn remove_comment(&self, comment_id: CommentId) -> anyhow::Result<bool> {
        let response = self
            .authorize(
                self.client
                    .delete(format!("{}/api/commentaire/{}", self.url, comment_id)),
            )
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            Ok(false)
        } else if response.status().is_success() {
            Ok(true)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to remove comment {}", error)
        }
    }

    /// Calls GET /api/livre/{book_id}/note endpoint
    pub async fn rating_for_book(&self, book_id: BookId) -> anyhow::Result<RatingSummary> {
        let response = self
            .client
            .get(format!("{}/api/livre/{}/note", self.url, book_id))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to get rating {}", error)
        }
    }

    /// Calls GET /api/palmares endpoint
    pub async fn ratings_board(&self) -> anyhow::Result<RatingsBoardResponse> {
        let response = self
            .client
            .get(format!("{}/api/palmares", self.url))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to get ratings board {}", error)
        }
    }
}
