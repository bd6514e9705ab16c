//! Data Transfer Objects for the kernel/agent boundary
//!
//! The agent reaches privileged Docker operations through the kernel's
//! localhost HTTP API. Both sides share these request and response bodies.

pub mod docker;
