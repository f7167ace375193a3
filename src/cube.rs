//! The reconstructed data cube: its time axis, its dense tensor
//! representation, the accumulator that builds it frame by frame, and the
//! background worker that may realign it in flight.

pub mod axis;
pub mod builder;
pub mod model;
pub mod worker;
