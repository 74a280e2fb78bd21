#![no_std]

//! ESP32-S3 implementations of the sensor hub's storage, network and power services.

pub mod network;
pub mod platform;
pub mod portal;
pub mod storage;
