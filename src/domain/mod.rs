// Core trading domain
pub mod types;

// Domain-specific error types
pub mod errors;

// Events published on the bus
pub mod events;

// Port interfaces
pub mod ports;
