//! Core domain types
//!
//! These types describe the workloads managed by the agent and the values
//! it broadcasts about them. They carry no behavior beyond validation and
//! formatting; persistence and execution live in the agent.

pub mod event;
pub mod instance;
pub mod log;
pub mod service;
