use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Vehicle category. Ordering drives the order of availability groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VehicleType {
    Compact,
    Sedan,
    #[serde(rename = "SUV", alias = "Suv")]
    Suv,
    Van,
}

impl VehicleType {
    pub const ALL: [VehicleType; 4] = [
        VehicleType::Compact,
        VehicleType::Sedan,
        VehicleType::Suv,
        VehicleType::Van,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Compact => "Compact",
            VehicleType::Sedan => "Sedan",
            VehicleType::Suv => "SUV",
            VehicleType::Van => "Van",
        }
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleType {
    type Err = String;

    /// Case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VehicleType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown vehicle type: {s}"))
    }
}

/// Optimistic-concurrency token. Opaque to clients; only compared for equality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    pub(crate) fn next(self) -> Self {
        Version(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Closed calendar-date interval `[pickup, return]`.
///
/// Ordering of the endpoints is not enforced: an inverted range is accepted and
/// simply runs through the same predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub pickup_date: NaiveDate,
    pub return_date: NaiveDate,
}

impl DateRange {
    pub fn new(pickup_date: NaiveDate, return_date: NaiveDate) -> Self {
        Self {
            pickup_date,
            return_date,
        }
    }

    /// Inclusive on both ends.
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.pickup_date <= date && date <= self.return_date
    }

    pub fn is_inverted(&self) -> bool {
        self.pickup_date > self.return_date
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: Ulid,
    pub description: String,
    #[serde(rename = "type")]
    pub vehicle_type: VehicleType,
    /// Concurrency token; `rowVersion` on the wire.
    #[serde(rename = "rowVersion", alias = "version")]
    pub version: Version,
    #[serde(rename = "latestReservationDateTime", alias = "latestReservationAt")]
    pub latest_reservation_at: Option<DateTime<Utc>>,
}

impl Vehicle {
    pub fn new(id: Ulid, description: String, vehicle_type: VehicleType) -> Self {
        Self {
            id,
            description,
            vehicle_type,
            version: Version::default(),
            latest_reservation_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub pickup_date: NaiveDate,
    pub return_date: NaiveDate,
}

impl Reservation {
    pub fn new(id: Ulid, vehicle_id: Ulid, range: DateRange) -> Self {
        Self {
            id,
            vehicle_id,
            pickup_date: range.pickup_date,
            return_date: range.return_date,
        }
    }

    pub fn range(&self) -> DateRange {
        DateRange::new(self.pickup_date, self.return_date)
    }
}

/// A vehicle together with its reservation history, as held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleState {
    pub vehicle: Vehicle,
    /// Sorted by `pickup_date`.
    pub reservations: Vec<Reservation>,
}

impl VehicleState {
    pub fn new(vehicle: Vehicle) -> Self {
        Self {
            vehicle,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by pickup date.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.pickup_date <= reservation.pickup_date);
        self.reservations.insert(pos, reservation);
    }
}

/// WAL record payload. Flat, no nesting.
///
/// A commit is one `ReservationCommitted` record: reservation, version bump and
/// timestamp land together or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VehicleAdded {
        vehicle: Vehicle,
    },
    ReservationCommitted {
        reservation: Reservation,
        version: Version,
        reserved_at: DateTime<Utc>,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleAvailability {
    #[serde(rename = "type")]
    pub vehicle_type: VehicleType,
    pub available_vehicles: Vec<Vehicle>,
}

/// Outcome of a reservation attempt. Infrastructure failures are not part of
/// this type; they travel as `Err(StoreError)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationStatus {
    Success(Reservation),
    NotAvailable,
    Conflict,
}

impl ReservationStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ReservationStatus::Success(_) => "success",
            ReservationStatus::NotAvailable => "not_available",
            ReservationStatus::Conflict => "conflict",
        }
    }
}
