pub mod api;
pub mod availability;
pub mod compactor;
pub mod config;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reservation;
pub mod seed;
pub mod store;
pub mod wal;
