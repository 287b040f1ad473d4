use paperclip::actix::Apiv2Schema;
use serde::{Deserialize, Serialize};

use biblioservice_catalog::api::BookId;
use biblioservice_circulation::api::UserId;

pub type CommentId = i32;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
/// A rating and review left by a student on a book
pub struct CommentRecord {
    pub comment_id: CommentId,
    pub book_id: BookId,
    pub user_id: UserId,
    pub username: String,
    /// 1 to 5 stars
    pub rating: i16,
    pub body: String,
    pub posted_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct AddCommentRequest {
    /// 1 to 5 stars
    pub rating: i16,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct RatingSummary {
    pub book_id: BookId,
    pub average_rating: f64,
    pub comment_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct TopRatedBook {
    pub book_id: BookId,
    pub title: String,
    pub average_rating: f64,
    pub comment_count: i64,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
/// The periodically recomputed charts served at /api/palmares
pub struct RatingsBoardResponse {
    /// Best average rating first, needs at least 2 ratings to chart
    pub top_rated: Vec<TopRatedBook>,
    /// Most commented books first
    pub most_reviewed: Vec<TopRatedBook>,
}
