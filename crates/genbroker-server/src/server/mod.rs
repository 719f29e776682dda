//! Broker internals, leaves first: [`admission`] and [`bus`] have no
//! dependencies on the rest, [`correlation`] builds on the bus, [`broker`]
//! composes all three, and [`service`] exposes the broker over HTTP.

pub mod admission;
pub mod broker;
pub mod bus;
pub mod config;
pub mod correlation;
pub mod service;
pub mod telemetry;
pub mod worker;
