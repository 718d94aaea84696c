//! End-to-end emitter tests
//!
//! Each scenario builds a checked program, lowers it through the emitter
//! (including the static refcount verifier), executes the result on the
//! reference interpreter in `support`, and observes outcomes through
//! program globals and live heap counts.

mod support;

mod classes;
mod closures;
mod refcount;
mod switches;
