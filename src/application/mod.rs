// Orchestrator
pub mod engine;

// Market data caching
pub mod market_data;

// Risk management and position control
pub mod risk;

// Signal generation
pub mod signal;

// Symbol universe
pub mod symbols;

// Signal worker pool
pub mod worker_pool;
