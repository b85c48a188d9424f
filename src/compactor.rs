use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::store::Fleet;

const CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(fleet: Arc<Fleet>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&fleet, threshold).await;
    }
}

/// Returns true when a compaction ran and succeeded.
pub async fn compact_if_needed(fleet: &Fleet, threshold: u64) -> bool {
    let appends = fleet.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    info!("compacting WAL after {appends} appends");
    match fleet.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use ulid::Ulid;

    use crate::model::*;
    use crate::wal::Wal;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("fleetbook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let fleet = Fleet::open(path.clone()).unwrap();
        let vehicle = fleet
            .add_vehicle(Ulid::new(), "Van Vehicle 1".into(), VehicleType::Van)
            .await
            .unwrap();

        assert!(!compact_if_needed(&fleet, 5).await);

        let day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let mut version = vehicle.version;
        for offset in 0..4 {
            let range = DateRange::new(day + chrono::Days::new(offset * 10), day + chrono::Days::new(offset * 10 + 1));
            let updated = fleet
                .commit_reservation(vehicle.id, version, Reservation::new(Ulid::new(), vehicle.id, range))
                .await
                .unwrap();
            version = updated.version;
        }
        assert_eq!(fleet.wal_appends_since_compact().await, 5);

        assert!(compact_if_needed(&fleet, 5).await);
        assert_eq!(fleet.wal_appends_since_compact().await, 0);

        // One vehicle record plus its four reservations.
        assert_eq!(Wal::replay(&path).unwrap().len(), 5);
    }
}
