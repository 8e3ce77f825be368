//! Session domain module.
//!
//! # Module Structure
//!
//! - `consumer`: drives one streaming generation (`StreamConsumer`, `StreamObserver`)
//! - `controller`: submission lifecycle, busy flag and generation tokens (`SessionController`)

mod consumer;
mod controller;
#[cfg(test)]
mod test_support;

pub use consumer::{ConsumeOutcome, StreamConsumer, StreamObserver};
pub use controller::{
    Rejection, SessionController, SessionOptions, SessionState, SubmitOutcome, Submission,
};
