//! Clock, boot cause and deep sleep for ESP32-S3.

pub mod clock;
pub mod power;
