//! Vertex Core
//!
//! Core types shared by the Vertex agent and kernel.
//!
//! This crate contains:
//! - Domain types: instances, service manifests, events and log lines
//! - DTOs: request/response bodies of the kernel Docker API

pub mod domain;
pub mod dto;
