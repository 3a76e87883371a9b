//! Integration test suite for conformd.
//!
//! These tests drive a real `JobEngine` over an in-memory store and, for
//! the conformance scenarios, a simulated Kubernetes cluster.
//!
//! # Test Categories
//!
//! - `scenarios`: End-to-end jobs and deployment-spec conformance
//! - `graph_semantics`: Guards, meta-task splicing and expansion failures
//! - `locking`: Cross-job locks, the job queue, cancellation and shutdown
//! - `history`: Job history file

mod fixtures;

mod graph_semantics;
mod history;
mod locking;
mod scenarios;
