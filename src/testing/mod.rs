//! Testing utilities and mock implementations
//!
//! Mocks for the broker transport, timer, clock, signer and sensor so the
//! publishing path can be tested without a broker, key material or GPIO.

pub mod mocks;

pub use mocks::*;
