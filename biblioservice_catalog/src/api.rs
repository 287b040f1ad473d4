use paperclip::actix::Apiv2Schema;
use serde::{Deserialize, Serialize};

pub type BookId = i32;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Full description of a catalog entry, including the number of physical copies owned
pub struct BookDetails {
    pub title: String,
    pub authors: Vec<String>,
    pub publisher: String,
    pub description: String,
    pub isbn: String,
    pub tags: Vec<String>,
    pub total_copies: i32,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Partial update to book details. Only the fields that are set are applied
pub struct BookDetailsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_copies: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Listing entry returned by the catalog search
pub struct BookSummary {
    pub book_id: BookId,
    pub title: String,
    pub authors: Vec<String>,
    pub total_copies: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct GetAllBooksResponse {
    pub books: Vec<BookSummary>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Apiv2Schema)]
pub struct BookSearchQuery {
    /// Case insensitive substring matched against title and authors
    pub q: Option<String>,
}
