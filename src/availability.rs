use std::collections::BTreeMap;
use std::time::Instant;

use crate::limits::MAX_RESERVATIONS_PER_VEHICLE;
use crate::model::*;
use crate::observability;
use crate::store::{FleetStore, StoreError};

/// Does `existing` block a request for `requested`?
///
/// Only the requested endpoints are tested against the existing reservation
/// (inclusive). A reservation lying strictly inside the requested range is
/// not detected.
pub fn conflicts(requested: &DateRange, existing: &DateRange) -> bool {
    existing.contains_date(requested.pickup_date) || existing.contains_date(requested.return_date)
}

/// Free for `requested` and still below the per-vehicle reservation cap, so a
/// commit against it cannot fail on the limit.
pub fn is_available(vehicle: &VehicleState, requested: &DateRange) -> bool {
    vehicle.reservations.len() < MAX_RESERVATIONS_PER_VEHICLE
        && !vehicle
            .reservations
            .iter()
            .any(|r| conflicts(requested, &r.range()))
}

/// Group `vehicles` by type and keep the free ones.
///
/// Every type present in the input yields exactly one entry, possibly with no
/// vehicles. Entries follow `VehicleType` order; vehicles keep input order.
pub fn group_availability(vehicles: &[VehicleState], requested: &DateRange) -> Vec<VehicleAvailability> {
    let mut groups: BTreeMap<VehicleType, Vec<Vehicle>> = BTreeMap::new();
    for vs in vehicles {
        let free = groups.entry(vs.vehicle.vehicle_type).or_default();
        if is_available(vs, requested) {
            free.push(vs.vehicle.clone());
        }
    }
    groups
        .into_iter()
        .map(|(vehicle_type, available_vehicles)| VehicleAvailability {
            vehicle_type,
            available_vehicles,
        })
        .collect()
}

/// Fresh read of the fleet and per-type availability for `requested`.
/// An empty `types` filter includes every type.
pub async fn vehicle_availabilities(
    store: &dyn FleetStore,
    requested: &DateRange,
    types: &[VehicleType],
) -> Result<Vec<VehicleAvailability>, StoreError> {
    let started = Instant::now();
    let vehicles = store.list_vehicles(types).await?;
    let result = group_availability(&vehicles, requested);

    metrics::counter!(observability::AVAILABILITY_QUERIES_TOTAL).increment(1);
    metrics::histogram!(observability::AVAILABILITY_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    Ok(result)
}
