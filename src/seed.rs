use ulid::Ulid;

use crate::model::VehicleType;
use crate::store::{Fleet, StoreError};

pub const VEHICLES_PER_TYPE: usize = 3;

/// Populate an empty fleet with `VEHICLES_PER_TYPE` vehicles of every type.
/// Returns how many vehicles were added; a non-empty fleet is left alone.
pub async fn seed_default_fleet(fleet: &Fleet) -> Result<usize, StoreError> {
    if fleet.vehicle_count() > 0 {
        return Ok(0);
    }
    let mut added = 0;
    for n in 1..=VEHICLES_PER_TYPE {
        for vehicle_type in VehicleType::ALL {
            fleet
                .add_vehicle(Ulid::new(), format!("{vehicle_type} Vehicle {n}"), vehicle_type)
                .await?;
            added += 1;
        }
    }
    tracing::info!("seeded default fleet with {added} vehicles");
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_wal_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("fleetbook_test_seed");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn seeds_three_of_each_type_once() {
        let fleet = Fleet::open(test_wal_path("seed_once.wal")).unwrap();
        assert_eq!(seed_default_fleet(&fleet).await.unwrap(), 12);
        assert_eq!(seed_default_fleet(&fleet).await.unwrap(), 0);

        for vehicle_type in VehicleType::ALL {
            let vehicles = fleet.list_vehicles(&[vehicle_type]).await;
            assert_eq!(vehicles.len(), VEHICLES_PER_TYPE);
            assert!(
                vehicles
                    .iter()
                    .any(|v| v.vehicle.description == format!("{vehicle_type} Vehicle 1"))
            );
        }
    }
}
