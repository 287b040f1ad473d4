pub use in_memory_comments_repository::InMemoryCommentsRepository;
pub use postgres_comments_repository::{
    PostgresCommentsRepository, PostgresCommentsRepositoryConfig,
};

use crate::api::{CommentId, CommentRecord, RatingSummary};
use biblioservice_catalog::api::BookId;
use biblioservice_circulation::api::UserId;

mod in_memory_comments_repository;
mod postgres_comments_repository;

#[derive(Debug, thiserror::Error)]
pub enum CommentsRepositoryError {
    #[error("Comment {0} not found")]
    CommentNotFound(CommentId),

    #[error("DatabaseFailure failure {0}")]
    DatabaseFailure(#[from] tokio_postgres::Error),

    #[error("Other error {0}")]
    Other(String),
}

/// A comment as submitted, before an id is assigned
#[derive(Debug, Clone, PartialEq)]
pub struct NewComment {
    pub book_id: BookId,
    pub user_id: UserId,
    pub username: String,
    pub rating: i16,
    pub body: String,
    pub posted_at: i64,
}

#[async_trait::async_trait]
pub trait CommentsRepository: Send + Sync {
    /// Stores the comment and returns its assigned id
    async fn add_comment(&self, comment: NewComment)
        -> Result<CommentId, CommentsRepositoryError>;

    async fn get_comment(
        &self,
        comment_id: CommentId,
    ) -> Result<CommentRecord, CommentsRepositoryError>;

    /// Removes the comment, returns true if it existed
    async fn remove_comment(
        &self,
        comment_id: CommentId,
    ) -> Result<bool, CommentsRepositoryError>;

    /// Lists comments for a book, newest first
    async fn list_for_book(
        &self,
        book_id: BookId,
    ) -> Result<Vec<CommentRecord>, CommentsRepositoryError>;

    /// Average rating and count for a book, None while it has no comments
    async fn rating_summary(
        &self,
        book_id: BookId,
    ) -> Result<Option<RatingSummary>, CommentsRepositoryError>;

    /// Average rating and count for every commented book
    async fn list_rating_summaries(
        &self,
    ) -> Result<Vec<RatingSummary>, CommentsRepositoryError>;
}
