//! Core runtime components of the collection-and-accounting pipeline.
//!
//! Leaf-first: shared types and errors, the clock abstraction, the energy
//! accounting engine, then the collection coordinator and the scheduler
//! that drives it, with the result publisher boundary at the top.

pub mod accounting;
pub mod clock;
pub mod coordinator;
pub mod error;
pub mod publisher;
pub mod scheduler;
pub mod types;
