pub mod classes;
pub mod core;
pub mod records;
pub mod setup;
pub mod stats;
