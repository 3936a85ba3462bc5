//! Integration test helpers for planner end-to-end scenarios.

pub mod harness;
