use core::net::Ipv4Addr;

use hub_core::provisioning::{Provisioning, ProvisioningStore};
use hub_hal_esp32s3::storage::{FlashError, flash_provisioning::FlashProvisioningStore};
use log::{info, warn};

const BUILD_WIFI_SSID: &str = match option_env!("SENSOR_HUB_WIFI_SSID") {
    Some(ssid) => ssid,
    None => "",
};
const BUILD_WIFI_PASSWORD: &str = match option_env!("SENSOR_HUB_WIFI_PASSWORD") {
    Some(password) => password,
    None => "",
};
const BUILD_MQTT_HOST: &str = match option_env!("SENSOR_HUB_MQTT_HOST") {
    Some(host) => host,
    None => "192.168.1.10",
};
const BUILD_MQTT_PORT: &str = match option_env!("SENSOR_HUB_MQTT_PORT") {
    Some(port) => port,
    None => "1883",
};
const DEFAULT_DEVICE_NAME: &str = "sensor";
const DEFAULT_MQTT_PORT: u16 = 1883;

/// Provisioning flash slot, or a stand-in when the partition is missing.
pub(super) enum ProvisioningSlot {
    Flash(FlashProvisioningStore),
    Unavailable,
}

impl ProvisioningSlot {
    pub(super) fn open() -> Self {
        match FlashProvisioningStore::new() {
            Ok(store) => Self::Flash(store),
            Err(err) => {
                warn!("settings: provisioning flash unavailable: {:?}", err);
                Self::Unavailable
            }
        }
    }
}

impl ProvisioningStore for ProvisioningSlot {
    type Error = FlashError;

    fn load(&mut self) -> Result<Option<Provisioning>, Self::Error> {
        match self {
            Self::Flash(store) => store.load(),
            Self::Unavailable => Ok(None),
        }
    }

    fn save(&mut self, provisioning: &Provisioning) -> Result<(), Self::Error> {
        match self {
            Self::Flash(store) => store.save(provisioning),
            Self::Unavailable => Err(FlashError::Unsupported),
        }
    }
}

/// Stored settings win over build-time ones; a missing name gets the default.
pub(super) fn resolve_provisioning(slot: &mut ProvisioningSlot) -> Provisioning {
    let mut provisioning = match slot.load() {
        Ok(Some(stored)) if stored.is_complete() => {
            info!("settings: using stored wifi ssid={}", stored.ssid);
            stored
        }
        Ok(_) => build_time_provisioning(),
        Err(err) => {
            warn!("settings: stored provisioning unreadable: {:?}", err);
            build_time_provisioning()
        }
    };

    if provisioning.device_name.is_empty() {
        let _ = provisioning.device_name.push_str(DEFAULT_DEVICE_NAME);
    }
    provisioning
}

fn build_time_provisioning() -> Provisioning {
    let mut provisioning = Provisioning::default();
    if provisioning.ssid.push_str(BUILD_WIFI_SSID).is_err()
        || provisioning.password.push_str(BUILD_WIFI_PASSWORD).is_err()
    {
        warn!("settings: build-time wifi credentials too long; ignoring");
        return Provisioning::default();
    }
    if provisioning.is_complete() {
        info!("settings: using build-time wifi ssid={}", provisioning.ssid);
    } else {
        info!("settings: no wifi credentials provisioned");
    }
    provisioning
}

/// MQTT broker address from the build environment.
pub(super) fn broker_endpoint() -> Option<(Ipv4Addr, u16)> {
    let Ok(host) = BUILD_MQTT_HOST.parse::<Ipv4Addr>() else {
        warn!(
            "settings: SENSOR_HUB_MQTT_HOST={} is not an IPv4 address",
            BUILD_MQTT_HOST
        );
        return None;
    };
    let port = BUILD_MQTT_PORT.parse::<u16>().unwrap_or_else(|_| {
        warn!(
            "settings: SENSOR_HUB_MQTT_PORT={} invalid; using {}",
            BUILD_MQTT_PORT, DEFAULT_MQTT_PORT
        );
        DEFAULT_MQTT_PORT
    });
    Some((host, port))
}
