pub mod core;
pub mod drivers;
pub mod routes;
pub mod setup;
pub mod tracking;
pub mod vehicles;
