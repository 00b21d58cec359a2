//! Canonical event model and upstream protocol normalization.
//!
//! The upstream agent CLI emits heterogeneous NDJSON messages. This module
//! defines the single canonical event schema the rest of the system speaks
//! ([`canonical`]), the pure one-pass normalizer that produces it
//! ([`normalizer`]), and the outward-facing event envelopes pushed to
//! transport and persistence subscribers ([`outbound`]).

pub mod canonical;
pub mod normalizer;
pub mod outbound;
