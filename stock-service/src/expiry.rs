use crate::engine::StockEngine;
use crate::model::ReservationStatus;
use crate::reservation_store::ReservationStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

const SWEEP_BATCH: i64 = 100;

/// Time-driven release of reservations that were never fulfilled or
/// cancelled. The due-time lives on the reservation row, so expiry survives
/// process restarts: a startup sweep executes anything already past due and
/// the interval loop picks up the rest.
pub struct ExpiryScheduler {
    engine: Arc<StockEngine>,
    reservations: Arc<dyn ReservationStore>,
    sweep_interval: Duration,
}

impl ExpiryScheduler {
    pub fn new(
        engine: Arc<StockEngine>,
        reservations: Arc<dyn ReservationStore>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            engine,
            reservations,
            sweep_interval,
        }
    }

    /// Expires every reservation due as of now. Returns how many holds were
    /// released. The conditional ACTIVE -> EXPIRED update decides the winner
    /// of any race with a concurrent cancellation or fulfilment; a lost race
    /// is absorbed as a no-op. A reservation whose release fails is handed
    /// back to ACTIVE so a later sweep retries it instead of leaving a
    /// terminal row with its hold still in place.
    pub async fn sweep_once(&self) -> usize {
        let mut expired = 0usize;
        loop {
            let due = match self.reservations.due(Utc::now(), SWEEP_BATCH).await {
                Ok(due) => due,
                Err(err) => {
                    tracing::error!(?err, "Failed to scan due reservations");
                    return expired;
                }
            };
            let batch_len = due.len();
            let before = expired;

            for reservation in due {
                match self
                    .reservations
                    .transition(
                        reservation.id,
                        ReservationStatus::Active,
                        ReservationStatus::Expired,
                    )
                    .await
                {
                    Ok(Some(expired_reservation)) => {
                        match self
                            .engine
                            .release_hold(&expired_reservation, "Reservation expired")
                            .await
                        {
                            Ok(_) => {
                                expired += 1;
                                tracing::info!(
                                    reservation_id = %reservation.id,
                                    product_id = %reservation.product_id,
                                    quantity = reservation.quantity,
                                    "Reservation expired and hold released"
                                );
                            }
                            Err(err) => {
                                tracing::error!(
                                    reservation_id = %reservation.id,
                                    error = %err,
                                    "Failed to release expired reservation; reinstating for the next sweep"
                                );
                                self.engine
                                    .reinstate_reservation(
                                        reservation.id,
                                        ReservationStatus::Expired,
                                    )
                                    .await;
                            }
                        }
                    }
                    // Already fulfilled or cancelled; the timer fires as a no-op.
                    Ok(None) => {}
                    Err(err) => {
                        tracing::error!(reservation_id = %reservation.id, ?err, "Failed to expire reservation");
                    }
                }
            }

            // A full batch that made no progress would be re-fetched verbatim;
            // leave the stragglers to the next scheduled sweep.
            if batch_len < SWEEP_BATCH as usize || expired == before {
                return expired;
            }
        }
    }

    /// Startup recovery: execute expiry for everything already past due so
    /// no reservation is lost to a restart.
    pub async fn recover(&self) {
        let recovered = self.sweep_once().await;
        if recovered > 0 {
            tracing::info!(recovered, "Recovered overdue reservations on startup");
        }
    }

    /// Background sweeper loop in the shape of the service's other periodic
    /// tasks: sleep, sweep, log, repeat.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.sweep_interval).await;
                let start = std::time::Instant::now();
                let expired = self.sweep_once().await;
                if expired > 0 {
                    tracing::debug!(
                        expired,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Reservation sweep complete"
                    );
                }
            }
        })
    }
}
