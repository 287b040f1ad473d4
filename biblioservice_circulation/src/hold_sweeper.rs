use std::sync::Arc;

use futures_util::stream::StreamExt;
use opentelemetry_sdk::util::tokio_interval_stream;

use crate::circulation_repository::CirculationRepository;
use crate::policy::{now_epoch_seconds, CirculationPolicy};

/// Periodically expires ready holds whose pickup deadline passed and hands
/// the freed copies to the next students in the queues
pub struct HoldSweeper {
    repository: Arc<dyn CirculationRepository>,
    policy: CirculationPolicy,
}

impl HoldSweeper {
    pub fn new(repository: Arc<dyn CirculationRepository>, policy: CirculationPolicy) -> Self {
        Self { repository, policy }
    }

    pub async fn start(self) -> anyhow::Result<()> {
        let mut ticker = tokio_interval_stream(std::time::Duration::from_secs(
            self.policy.hold_sweep_seconds,
        ));

        while ticker.next().await.is_some() {
            let now = now_epoch_seconds();
            match self
                .repository
                .expire_ready_holds(now, self.policy.hold_deadline(now))
                .await
            {
                Ok(sweep) => {
                    if sweep.expired > 0 {
                        tracing::info!(
                            "Expired {} ready holds, promoted {} queued reservations",
                            sweep.expired,
                            sweep.promoted.len()
                        );
                    }
                    for notice in sweep.promoted {
                        tracing::info!(
                            "Reservation {} of user {} for book {} is ready for pickup",
                            notice.reservation_id,
                            notice.user_id,
                            notice.book_id
                        );
                    }
                }
                Err(err) => {
                    tracing::error!("Hold sweep failed {}", err);
                }
            }
        }
        Ok(())
    }
}
