use ulid::Ulid;

use crate::model::*;

use super::Fleet;

impl Fleet {
    /// Snapshot of every matching vehicle with its reservations, ordered by id.
    /// Each vehicle is read under its own lock; the result is not a fleet-wide
    /// point-in-time view, which the version check makes unnecessary.
    pub async fn list_vehicles(&self, types: &[VehicleType]) -> Vec<VehicleState> {
        let mut snapshot = Vec::new();
        for (_, vs) in self.vehicle_handles() {
            let guard = vs.read().await;
            if types.is_empty() || types.contains(&guard.vehicle.vehicle_type) {
                snapshot.push(guard.clone());
            }
        }
        snapshot
    }

    pub async fn get_vehicle(&self, id: &Ulid) -> Option<Vehicle> {
        let vs = self.get_vehicle_state(id)?;
        let guard = vs.read().await;
        Some(guard.vehicle.clone())
    }

    pub async fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        let vehicle_id = self.reservation_index.get(id).map(|e| *e.value())?;
        let vs = self.get_vehicle_state(&vehicle_id)?;
        let guard = vs.read().await;
        guard.reservations.iter().find(|r| r.id == *id).cloned()
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservation_index.len()
    }
}
