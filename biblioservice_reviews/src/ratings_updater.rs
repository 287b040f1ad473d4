use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::StreamExt;
use opentelemetry_sdk::util::tokio_interval_stream;
use parking_lot::RwLock;

use biblioservice_catalog::api::BookId;
use biblioservice_catalog::client::CatalogClient;

use crate::api::RatingsBoardResponse;
use crate::comments_repository::CommentsRepository;
use crate::ratings::RatingsBoard;

const INTERVAL_SECONDS: u64 = 30;

/// Read side of the board, shared with the handlers
#[derive(Clone)]
pub struct RatingsProvider {
    board: Arc<RwLock<RatingsBoard>>,
}

impl RatingsProvider {
    pub fn board_response(&self) -> RatingsBoardResponse {
        self.board.read().response()
    }
}

pub struct RatingsUpdater {
    board: Arc<RwLock<RatingsBoard>>,
    comments_repository: Arc<dyn CommentsRepository>,
    catalog_client: CatalogClient,
}

impl RatingsUpdater {
    pub fn new(
        comments_repository: Arc<dyn CommentsRepository>,
        catalog_url: &str,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            board: Arc::new(Default::default()),
            comments_repository,
            catalog_client: CatalogClient::new(catalog_url)?,
        })
    }

    pub fn provider(&self) -> RatingsProvider {
        RatingsProvider {
            board: self.board.clone(),
        }
    }

    pub async fn start(self) -> anyhow::Result<()> {
        let mut periodic_updater =
            tokio_interval_stream(std::time::Duration::from_secs(INTERVAL_SECONDS));
        let mut interval_no: u64 = 0;

        while periodic_updater.next().await.is_some() {
            tracing::info!("Ratings tick no {}", interval_no);

            let summaries = self.comments_repository.list_rating_summaries().await?;

            let titles: HashMap<BookId, String> = self
                .catalog_client
                .list_books(None)
                .await?
                .into_iter()
                .map(|summary| (summary.book_id, summary.title))
                .collect();

            self.board.write().rebuild(&summaries, &titles);

            interval_no += 1;
        }
        Ok(())
    }
}
