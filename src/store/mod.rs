mod error;
mod mutations;
mod queries;

pub use error::StoreError;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::observability;
use crate::wal::Wal;

pub type SharedVehicleState = Arc<RwLock<VehicleState>>;

/// Persistence seam for the availability and reservation logic.
#[async_trait]
pub trait FleetStore: Send + Sync {
    /// Vehicles with their reservations, ordered by vehicle id. An empty filter
    /// selects every type.
    async fn list_vehicles(&self, types: &[VehicleType]) -> Result<Vec<VehicleState>, StoreError>;

    /// Attach `reservation` to the vehicle iff its version still equals
    /// `expected`. On success the version has been bumped and the change is
    /// durable; on `VersionMismatch` nothing was written.
    async fn commit_reservation(
        &self,
        vehicle_id: Ulid,
        expected: Version,
        reservation: Reservation,
    ) -> Result<Vehicle, StoreError>;
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
    #[cfg(test)]
    FailNextSync,
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Every append that is already queued when the first one is
/// picked up rides the same fsync; callers are answered once it lands.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    // A failed batch is rolled back whole, so none of these waiters' events
    // can reach disk with a later batch.
    let result = wal.append_batch(batch.iter().map(|(event, _)| event));

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        #[cfg(test)]
        WalCommand::FailNextSync => wal.fail_next_sync(),
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// In-memory fleet backed by a write-ahead log.
///
/// Each vehicle sits behind its own lock; there is no fleet-wide lock on the
/// reservation path.
pub struct Fleet {
    pub(super) vehicles: DashMap<Ulid, SharedVehicleState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: reservation id → vehicle id
    pub(super) reservation_index: DashMap<Ulid, Ulid>,
    /// Serializes fleet membership changes against compaction.
    pub(super) membership: Mutex<()>,
}

/// Apply a reservation event to a vehicle the caller holds exclusively.
fn apply_to_vehicle(vs: &mut VehicleState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ReservationCommitted {
            reservation,
            version,
            reserved_at,
        } => {
            index.insert(reservation.id, reservation.vehicle_id);
            vs.insert_reservation(reservation.clone());
            vs.vehicle.version = *version;
            vs.vehicle.latest_reservation_at = Some(*reserved_at);
        }
        // Membership is handled at the map level.
        Event::VehicleAdded { .. } => {}
    }
}

impl Fleet {
    /// Replay `wal_path` and start the background WAL writer. Must be called
    /// inside a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let reservation_index = DashMap::new();
        let mut replayed: HashMap<Ulid, VehicleState> = HashMap::new();
        for event in &events {
            match event {
                Event::VehicleAdded { vehicle } => {
                    replayed.insert(vehicle.id, VehicleState::new(vehicle.clone()));
                }
                Event::ReservationCommitted { reservation, .. } => {
                    match replayed.get_mut(&reservation.vehicle_id) {
                        Some(vs) => apply_to_vehicle(vs, event, &reservation_index),
                        None => tracing::warn!(
                            "replay: reservation {} references unknown vehicle {}",
                            reservation.id,
                            reservation.vehicle_id
                        ),
                    }
                }
            }
        }

        let vehicles: DashMap<Ulid, SharedVehicleState> = replayed
            .into_iter()
            .map(|(id, vs)| (id, Arc::new(RwLock::new(vs))))
            .collect();
        tracing::info!(
            "fleet replayed {} events: {} vehicles, {} reservations",
            events.len(),
            vehicles.len(),
            reservation_index.len()
        );
        metrics::gauge!(observability::VEHICLES).set(vehicles.len() as f64);

        Ok(Self {
            vehicles,
            wal_tx,
            reservation_index,
            membership: Mutex::new(()),
        })
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    pub(super) async fn persist_and_apply(
        &self,
        vs: &mut VehicleState,
        event: &Event,
    ) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        apply_to_vehicle(vs, event, &self.reservation_index);
        Ok(())
    }

    /// The next WAL batch fails after reaching the file, before fsync.
    #[cfg(test)]
    pub(crate) async fn fail_next_wal_sync(&self) {
        let _ = self.wal_tx.send(WalCommand::FailNextSync).await;
    }

    pub fn get_vehicle_state(&self, id: &Ulid) -> Option<SharedVehicleState> {
        self.vehicles.get(id).map(|e| e.value().clone())
    }

    /// Handles to every vehicle, ordered by id. The map guard is released
    /// before returning so callers may await on the locks.
    pub(super) fn vehicle_handles(&self) -> Vec<(Ulid, SharedVehicleState)> {
        let mut handles: Vec<_> = self
            .vehicles
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        handles.sort_by_key(|(id, _)| *id);
        handles
    }
}

#[async_trait]
impl FleetStore for Fleet {
    async fn list_vehicles(&self, types: &[VehicleType]) -> Result<Vec<VehicleState>, StoreError> {
        Ok(Fleet::list_vehicles(self, types).await)
    }

    async fn commit_reservation(
        &self,
        vehicle_id: Ulid,
        expected: Version,
        reservation: Reservation,
    ) -> Result<Vehicle, StoreError> {
        Fleet::commit_reservation(self, vehicle_id, expected, reservation).await
    }
}
