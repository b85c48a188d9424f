pub const MAX_VEHICLES: usize = 100_000;
pub const MAX_DESCRIPTION_LEN: usize = 256;
pub const MAX_RESERVATIONS_PER_VEHICLE: usize = 10_000;
