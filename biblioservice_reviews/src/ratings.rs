use std::cmp::Ordering;
use std::collections::HashMap;

use itertools::Itertools;

use crate::api::{RatingSummary, RatingsBoardResponse, TopRatedBook};
use biblioservice_catalog::api::BookId;

/// A book needs this many ratings before it can chart
const MIN_RATINGS_TO_CHART: i64 = 2;
const CHART_SIZE: usize = 10;

#[derive(Default)]
pub struct RatingsBoard {
    top_rated: Vec<TopRatedBook>,
    most_reviewed: Vec<TopRatedBook>,
}

impl RatingsBoard {
    /// Recomputes both charts from the rating aggregates joined with the
    /// catalog titles. Books the catalog no longer knows are skipped
    pub fn rebuild(
        &mut self,
        summaries: &[RatingSummary],
        titles: &HashMap<BookId, String>,
    ) {
        let charted: Vec<TopRatedBook> = summaries
            .iter()
            .filter_map(|summary| {
                let title = match titles.get(&summary.book_id) {
                    Some(title) => title.clone(),
                    None => {
                        tracing::warn!("Could not find title for {}", summary.book_id);
                        return None;
                    }
                };
                Some(TopRatedBook {
                    book_id: summary.book_id,
                    title,
                    average_rating: summary.average_rating,
                    comment_count: summary.comment_count,
                })
            })
            .collect();

        self.top_rated = charted
            .iter()
            .filter(|book| book.comment_count >= MIN_RATINGS_TO_CHART)
            .cloned()
            .sorted_by(|a, b| {
                b.average_rating
                    .partial_cmp(&a.average_rating)
                    .unwrap_or(Ordering::Equal)
                    .then(b.comment_count.cmp(&a.comment_count))
            })
            .take(CHART_SIZE)
            .collect();

        self.most_reviewed = charted
            .into_iter()
            .sorted_by_key(|book| -book.comment_count)
            .take(CHART_SIZE)
            .collect();
    }

    pub fn response(&self) -> RatingsBoardResponse {
        RatingsBoardResponse {
            top_rated: self.top_rated.clone(),
            most_reviewed: self.most_reviewed.clone(),
        }
    }
}
