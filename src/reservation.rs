use std::sync::Arc;
use std::time::Instant;

use ulid::Ulid;

use crate::availability::vehicle_availabilities;
use crate::model::*;
use crate::observability;
use crate::store::{FleetStore, StoreError};

/// Turns reservation requests into committed reservations.
///
/// Single attempt per call: a lost race is reported as `Conflict` and the
/// caller decides whether to ask again.
#[derive(Clone)]
pub struct ReservationService {
    store: Arc<dyn FleetStore>,
}

impl ReservationService {
    pub fn new(store: Arc<dyn FleetStore>) -> Self {
        Self { store }
    }

    pub async fn availabilities(
        &self,
        requested: &DateRange,
        types: &[VehicleType],
    ) -> Result<Vec<VehicleAvailability>, StoreError> {
        vehicle_availabilities(self.store.as_ref(), requested, types).await
    }

    pub async fn reserve(
        &self,
        requested: DateRange,
        vehicle_type: VehicleType,
    ) -> Result<ReservationStatus, StoreError> {
        let started = Instant::now();
        let result = self.attempt(requested, vehicle_type).await;

        let label = match &result {
            Ok(status) => status.label(),
            Err(_) => "error",
        };
        metrics::counter!(observability::RESERVATIONS_TOTAL, "status" => label).increment(1);
        metrics::histogram!(observability::RESERVATION_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn attempt(
        &self,
        requested: DateRange,
        vehicle_type: VehicleType,
    ) -> Result<ReservationStatus, StoreError> {
        let availability = self.availabilities(&requested, &[vehicle_type]).await?;

        // Vehicles arrive ordered by id, so the pick is deterministic.
        let Some(candidate) = availability
            .into_iter()
            .find(|a| a.vehicle_type == vehicle_type)
            .and_then(|a| a.available_vehicles.into_iter().next())
        else {
            tracing::debug!(
                "no {vehicle_type} available for {} to {}",
                requested.pickup_date,
                requested.return_date
            );
            return Ok(ReservationStatus::NotAvailable);
        };

        let reservation = Reservation::new(Ulid::new(), candidate.id, requested);
        match self
            .store
            .commit_reservation(candidate.id, candidate.version, reservation.clone())
            .await
        {
            Ok(_) => {
                tracing::info!(
                    "reserved {vehicle_type} vehicle {} ({} to {}) as {}",
                    candidate.id,
                    requested.pickup_date,
                    requested.return_date,
                    reservation.id
                );
                Ok(ReservationStatus::Success(reservation))
            }
            Err(e) if e.is_version_mismatch() => {
                tracing::info!("reservation conflict on vehicle {}: {e}", candidate.id);
                Ok(ReservationStatus::Conflict)
            }
            Err(e) => Err(e),
        }
    }
}
