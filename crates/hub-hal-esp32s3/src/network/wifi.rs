use embassy_net::Stack;
use embassy_time::{Duration, Timer, WithTimeout};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController};
use hub_core::platform::Network;
use log::{info, warn};

use super::WifiConfig;

const CONNECT_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF_MIN_SECS: u64 = 1;
const RETRY_BACKOFF_MAX_SECS: u64 = 8;
const DHCP_TIMEOUT_SECS: u64 = 15;

/// Station-mode Wi-Fi link driven on demand by the power controller.
pub struct WifiLink<'a> {
    controller: WifiController<'a>,
    stack: Stack<'a>,
    credentials: WifiConfig<'a>,
    configured: bool,
}

impl<'a> WifiLink<'a> {
    pub fn new(
        controller: WifiController<'a>,
        stack: Stack<'a>,
        credentials: WifiConfig<'a>,
    ) -> Self {
        Self {
            controller,
            stack,
            credentials,
            configured: false,
        }
    }

    fn configure(&mut self) -> bool {
        if self.configured {
            return true;
        }
        if self.credentials.ssid.is_empty() {
            warn!("wifi: no ssid provisioned");
            return false;
        }

        let client_config = ClientConfig::default()
            .with_ssid(self.credentials.ssid.into())
            .with_password(self.credentials.password.into());
        match self.controller.set_config(&ModeConfig::Client(client_config)) {
            Ok(()) => {
                info!("wifi: configured ssid={}", self.credentials.ssid);
                self.configured = true;
                true
            }
            Err(err) => {
                warn!("wifi: mode config failed: {:?}", err);
                false
            }
        }
    }

    async fn try_connect(&mut self) -> bool {
        if !self.controller.is_started().unwrap_or(false)
            && let Err(err) = self.controller.start_async().await
        {
            warn!("wifi: start failed: {:?}", err);
            return false;
        }

        if let Err(err) = self.controller.connect_async().await {
            warn!("wifi: connect failed: {:?}", err);
            let _ = self.controller.disconnect_async().await;
            return false;
        }

        match self
            .stack
            .wait_config_up()
            .with_timeout(Duration::from_secs(DHCP_TIMEOUT_SECS))
            .await
        {
            Ok(()) => {
                info!("wifi: connected and dhcp ready");
                true
            }
            Err(_) => {
                warn!("wifi: dhcp timeout");
                let _ = self.controller.disconnect_async().await;
                false
            }
        }
    }
}

fn retry_backoff_secs(consecutive_failures: u32) -> u64 {
    // 1, 2, 4, 8, 8, ...
    let shift = consecutive_failures.min(3);
    RETRY_BACKOFF_MIN_SECS
        .saturating_mul(1u64 << shift)
        .min(RETRY_BACKOFF_MAX_SECS)
}

impl Network for WifiLink<'_> {
    async fn connect(&mut self) -> bool {
        if !self.configure() {
            return false;
        }

        for attempt in 0..CONNECT_ATTEMPTS {
            if self.try_connect().await {
                return true;
            }
            if attempt + 1 < CONNECT_ATTEMPTS {
                let delay_secs = retry_backoff_secs(attempt);
                info!(
                    "wifi: retrying in {}s (attempt={}/{})",
                    delay_secs,
                    attempt + 1,
                    CONNECT_ATTEMPTS
                );
                Timer::after_secs(delay_secs).await;
            }
        }
        false
    }

    fn is_connected(&self) -> bool {
        let link_up = self.stack.is_link_up();
        let has_ipv4 = self.stack.config_v4().is_some();
        let associated = matches!(self.controller.is_connected(), Ok(true));
        link_up && has_ipv4 && associated
    }

    async fn disconnect(&mut self) {
        if let Err(err) = self.controller.disconnect_async().await {
            info!("wifi: disconnect: {:?}", err);
        }
        if let Err(err) = self.controller.stop_async().await {
            warn!("wifi: radio stop failed: {:?}", err);
        }
        info!("wifi: radio off");
    }
}
