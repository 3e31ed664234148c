// zlock demo: several simulated hosts taking turns on one distributed lock
// over an in-process coordination service

pub mod demo; // Contending hosts and the candidate observer
pub mod model; // Configuration
pub mod startup; // Logging and shutdown
