//! Microthread context.
//!
//! Every computation receives a [`Cx`] naming the microthread it runs in.
//! Suspension helpers (`yield_now`, `next_frame`,
//! `switch_to_new_microthread`) and cancellation checks go through it.

#[allow(clippy::module_inception)]
mod cx;

pub use cx::{Cancelled, Cx};
