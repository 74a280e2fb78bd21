#![cfg_attr(not(test), no_std)]

//! Board-independent recovery and power-state logic for the sensor hub.

pub mod command;
pub mod config;
pub mod controller;
pub mod crash_loop;
pub mod platform;
pub mod provisioning;
pub mod read_ahead;
pub mod record;
pub mod record_codec;
pub mod report;
pub mod reset_counter;
pub mod topics;
