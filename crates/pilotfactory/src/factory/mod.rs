//! Queue controllers and the cycle loop that drives them.
pub mod controller;
pub mod scheduler;
pub mod service;
