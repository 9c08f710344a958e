//! vmimport - Virtual machine import controller
//!
//! Reconciles `VirtualMachineImport` requests: connects to the source
//! platform (oVirt or VMware), validates the source VM against the mapping
//! rules, creates the target VM and its data volumes, and drives cold or
//! warm (incremental) disk imports to completion.

pub mod api;
pub mod cli;
pub mod conditions;
pub mod config;
pub mod controller;
pub mod logging;
pub mod mapper;
pub mod mapping;
pub mod metrics;
pub mod provider;
pub mod reconciler;
pub mod resources;
pub mod store;
pub mod validation;
