use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{Fleet, StoreError, WalCommand};

impl Fleet {
    pub async fn add_vehicle(
        &self,
        id: Ulid,
        description: String,
        vehicle_type: VehicleType,
    ) -> Result<Vehicle, StoreError> {
        if description.len() > MAX_DESCRIPTION_LEN {
            return Err(StoreError::LimitExceeded("vehicle description too long"));
        }
        let _membership = self.membership.lock().await;
        if self.vehicles.len() >= MAX_VEHICLES {
            return Err(StoreError::LimitExceeded("too many vehicles"));
        }
        if self.vehicles.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }

        let vehicle = Vehicle::new(id, description, vehicle_type);
        let event = Event::VehicleAdded {
            vehicle: vehicle.clone(),
        };
        self.wal_append(&event).await?;
        self.vehicles
            .insert(id, Arc::new(RwLock::new(VehicleState::new(vehicle.clone()))));
        metrics::gauge!(observability::VEHICLES).set(self.vehicles.len() as f64);
        tracing::debug!("added {vehicle_type} vehicle {id}");
        Ok(vehicle)
    }

    /// Compare-and-swap on the vehicle version. Check, WAL append and apply all
    /// happen under the vehicle's write lock, so two callers holding the same
    /// `expected` version cannot both succeed.
    pub async fn commit_reservation(
        &self,
        vehicle_id: Ulid,
        expected: Version,
        reservation: Reservation,
    ) -> Result<Vehicle, StoreError> {
        if reservation.vehicle_id != vehicle_id {
            return Err(StoreError::VehicleMismatch {
                reservation_id: reservation.id,
                vehicle_id,
            });
        }
        let vs = self
            .get_vehicle_state(&vehicle_id)
            .ok_or(StoreError::NotFound(vehicle_id))?;
        let mut guard = vs.write().await;

        let actual = guard.vehicle.version;
        if actual != expected {
            tracing::debug!(
                "reservation {} lost the race for vehicle {vehicle_id}: expected {expected}, found {actual}",
                reservation.id
            );
            return Err(StoreError::VersionMismatch {
                vehicle_id,
                expected,
                actual,
            });
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_VEHICLE {
            return Err(StoreError::LimitExceeded("too many reservations on vehicle"));
        }
        if self.reservation_index.contains_key(&reservation.id) {
            return Err(StoreError::AlreadyExists(reservation.id));
        }

        let reservation_id = reservation.id;
        let event = Event::ReservationCommitted {
            reservation,
            version: expected.next(),
            reserved_at: Utc::now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::debug!(
            "committed reservation {reservation_id} on vehicle {vehicle_id} at {}",
            guard.vehicle.version
        );
        Ok(guard.vehicle.clone())
    }

    /// Rewrite the WAL with the minimum events that rebuild the current fleet.
    ///
    /// Every vehicle is read-locked until the new log is in place, so no commit
    /// can land in the old log after its vehicle was snapshotted.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let _membership = self.membership.lock().await;

        let mut guards = Vec::with_capacity(self.vehicles.len());
        for (_, vs) in self.vehicle_handles() {
            guards.push(vs.read_owned().await);
        }

        let mut events = Vec::new();
        for guard in &guards {
            let vehicle = &guard.vehicle;
            events.push(Event::VehicleAdded {
                vehicle: vehicle.clone(),
            });
            let reserved_at = vehicle.latest_reservation_at.unwrap_or_else(Utc::now);
            events.extend(guard.reservations.iter().map(|r| Event::ReservationCommitted {
                reservation: r.clone(),
                version: vehicle.version,
                reserved_at,
            }));
        }
        let event_count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))?;

        tracing::info!("compacted WAL to {event_count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
