use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::api::{CommentId, CommentRecord, RatingSummary};
use crate::comments_repository::{CommentsRepository, CommentsRepositoryError, NewComment};
use biblioservice_catalog::api::BookId;

pub struct InMemoryCommentsRepository {
    comment_sequence_generator: AtomicI32,
    comments: parking_lot::RwLock<HashMap<CommentId, CommentRecord>>,
}

impl Default for InMemoryCommentsRepository {
    fn default() -> Self {
        Self {
            comment_sequence_generator: AtomicI32::new(1),
            comments: Default::default(),
        }
    }
}

fn summary_of(book_id: BookId, ratings: &[i16]) -> RatingSummary {
    let comment_count = ratings.len() as i64;
    let average_rating = ratings.iter().map(|&r| r as f64).sum::<f64>() / comment_count as f64;
    RatingSummary {
        book_id,
        average_rating,
        comment_count,
    }
}

#[async_trait::async_trait]
impl CommentsRepository for InMemoryCommentsRepository {
    async fn add_comment(
        &self,
        comment: NewComment,
    ) -> Result<CommentId, CommentsRepositoryError> {
        let comment_id = self.comment_sequence_generator.fetch_add(1, Ordering::Relaxed);
        self.comments.write().insert(
            comment_id,
            CommentRecord {
                comment_id,
                book_id: comment.book_id,
                user_id: comment.user_id,
                username: comment.username,
                rating: comment.rating,
                body: comment.body,
                posted_at: comment.posted_at,
            },
        );
        Ok(comment_id)
    }

    async fn get_comment(
        &self,
        comment_id: CommentId,
    ) -> Result<CommentRecord, CommentsRepositoryError> {
        self.comments
            .read()
            .get(&comment_id)
            .cloned()
            .ok_or(CommentsRepositoryError::CommentNotFound(comment_id))
    }

    async fn remove_comment(
        &self,
        comment_id: CommentId,
    ) -> Result<bool, CommentsRepositoryError> {
        Ok(self.comments.write().remove(&comment_id).is_some())
    }

    async fn list_for_book(
        &self,
        book_id: BookId,
    ) -> Result<Vec<CommentRecord>, CommentsRepositoryError> {
        let mut comments: Vec<CommentRecord> = self
            .comments
            .read()
            .values()
            .filter(|comment| comment.book_id == book_id)
            .cloned()
            .collect();
        comments.sort_by_key(|comment| (-comment.posted_at, -comment.comment_id));
        Ok(comments)
    }

    async fn rating_summary(
        &self,
        book_id: BookId,
    ) -> Result<Option<RatingSummary>, CommentsRepositoryError> {
        let ratings: Vec<i16> = self
            .comments
            .read()
            .values()
            .filter(|comment| comment.book_id == book_id)
            .map(|comment| comment.rating)
            .collect();
        Ok((!ratings.is_empty()).then(|| summary_of(book_id, &ratings)))
    }

    async fn list_rating_summaries(
        &self,
    ) -> Result<Vec<RatingSummary>, CommentsRepositoryError> {
        let mut ratings_by_book: HashMap<BookId, Vec<i16>> = Default::default();
        for comment in self.comments.read().values() {
            ratings_by_book
                .entry(comment.book_id)
                .or_default()
                .push(comment.rating);
        }
        let mut summaries: Vec<RatingSummary> = ratings_by_book
            .into_iter()
            .map(|(book_id, ratings)| summary_of(book_id, &ratings))
            .collect();
        summaries.sort_by_key(|summary| summary.book_id);
        Ok(summaries)
    }
}

#[cfg(test)]
mod in_memory_comments_repository_tests {
    use super::*;

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
    /// Covers the comment lifecycle
    /// 1. Adds two comments to a book, one to another
    /// 2. Lists comments of the first book newest first
    /// 3. Summaries average the ratings per book
    /// 4. Removal works once and only once
    async fn test_comments_and_summaries() {
        let repo = InMemoryCommentsRepository::default();

        let unknown = repo.get_comment(999).await;
        assert!(matches!(
            unknown,
            Err(CommentsRepositoryError::CommentNotFound(..))
        ));
        assert_eq!(repo.rating_summary(1).await.unwrap(), None);

        let first = repo.add_comment(comment(1, 10, 4, 1_000)).await.unwrap();
        let second = repo.add_comment(comment(1, 11, 5, 2_000)).await.unwrap();
        let _other = repo.add_comment(comment(2, 10, 2, 1_500)).await.unwrap();

        let listed = repo.list_for_book(1).await.unwrap();
        assert_eq!(listed.len(), 2);
        // newest first
        assert_eq!(listed[0].comment_id, second);
        assert_eq!(listed[1].comment_id, first);
        assert_eq!(listed[0].username, "user11");

        let summary = repo.rating_summary(1).await.unwrap().unwrap();
        assert_eq!(summary.comment_count, 2);
        assert!((summary.average_rating - 4.5).abs() < f64::EPSILON);

        let summaries = repo.list_rating_summaries().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].book_id, 1);
        assert_eq!(summaries[1].book_id, 2);
        assert!((summaries[1].average_rating - 2.0).abs() < f64::EPSILON);

        assert!(repo.remove_comment(first).await.unwrap());
        assert!(!repo.remove_comment(first).await.unwrap());

        let summary = repo.rating_summary(1).await.unwrap().unwrap();
        assert_eq!(summary.comment_count, 1);
        assert!((summary.average_rating - 5.0).abs() < f64::EPSILON);
    }
}
