//! Wi-Fi link and broker session.
//!
//! The power controller reads link and session state only through
//! `Network::is_connected` and `Transport::is_connected`.

pub mod mqtt;
pub mod wifi;

/// Wi-Fi credentials source.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WifiConfig<'a> {
    pub ssid: &'a str,
    pub password: &'a str,
}

impl<'a> WifiConfig<'a> {
    pub const fn new(ssid: &'a str, password: &'a str) -> Self {
        Self { ssid, password }
    }
}
