//! Configuration portal front ends.

pub mod serial;

pub use serial::SerialPortal;
