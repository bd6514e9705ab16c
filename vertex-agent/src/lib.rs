//! Vertex Agent
//!
//! Supervises self-hosted service instances on behalf of a user.
//!
//! Architecture:
//! - Event bus: in-process fan-out of status and log events
//! - Logger: per-instance ring buffer plus a daily rotating file
//! - Runners: Docker containers through the kernel, or local scripts
//! - Service: the instance registry and its lifecycle state machine

pub mod bus;
pub mod config;
pub mod env;
pub mod logger;
pub mod runner;
pub mod service;
