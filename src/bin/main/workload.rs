use core::fmt::Write as _;

use embassy_time::Timer;
use esp_hal::{
    Blocking,
    analog::adc::{Adc, AdcChannel, AdcPin},
    peripherals::ADC1,
};
use heapless::String;
use hub_core::platform::{Transport, Workload};
use hub_core::topics::{TopicKind, Topics};
use log::{info, warn};

const ADC_FULL_SCALE_RAW: u32 = 4095;
// 11 dB attenuation reads up to about 3.1 V at the pin.
const ADC_FULL_SCALE_MV: u32 = 3_100;
// 1:2 resistor divider between the cell and the pin.
const DIVIDER_RATIO: u32 = 2;
const BATTERY_EMPTY_MV: u32 = 3_000;
const BATTERY_FULL_MV: u32 = 4_200;
const SAMPLES: u32 = 8;
const SAMPLE_RETRIES: u32 = 100;

/// Samples the battery divider and publishes one reading per cycle.
pub(super) struct BatteryWorkload<'d, PIN> {
    adc: Adc<'d, ADC1<'d>, Blocking>,
    pin: AdcPin<PIN, ADC1<'d>>,
}

impl<'d, PIN> BatteryWorkload<'d, PIN>
where
    PIN: AdcChannel,
{
    pub(super) fn new(adc: Adc<'d, ADC1<'d>, Blocking>, pin: AdcPin<PIN, ADC1<'d>>) -> Self {
        Self { adc, pin }
    }

    async fn sample_raw(&mut self) -> Option<u16> {
        for _ in 0..SAMPLE_RETRIES {
            if let Ok(raw) = self.adc.read_oneshot(&mut self.pin) {
                return Some(raw);
            }
            Timer::after_micros(50).await;
        }
        None
    }

    async fn battery_mv(&mut self) -> Option<u32> {
        let mut total = 0u32;
        for _ in 0..SAMPLES {
            total += u32::from(self.sample_raw().await?);
        }
        let raw = total / SAMPLES;
        Some(raw * ADC_FULL_SCALE_MV / ADC_FULL_SCALE_RAW * DIVIDER_RATIO)
    }
}

fn battery_percent(millivolts: u32) -> u32 {
    let clamped = millivolts.clamp(BATTERY_EMPTY_MV, BATTERY_FULL_MV);
    (clamped - BATTERY_EMPTY_MV) * 100 / (BATTERY_FULL_MV - BATTERY_EMPTY_MV)
}

impl<PIN> Workload for BatteryWorkload<'_, PIN>
where
    PIN: AdcChannel,
{
    async fn publish_readings<T: Transport>(
        &mut self,
        transport: &mut T,
        topics: &Topics,
        uptime_ms: u64,
    ) -> bool {
        let Some(millivolts) = self.battery_mv().await else {
            warn!("workload: adc conversion never completed");
            return false;
        };

        let mut payload: String<128> = String::new();
        if write!(
            payload,
            "{{\"battery_voltage\":{}.{:03},\"battery_percent\":{},\"uptime_seconds\":{}}}",
            millivolts / 1000,
            millivolts % 1000,
            battery_percent(millivolts),
            uptime_ms / 1000
        )
        .is_err()
        {
            return false;
        }

        let topic = topics.topic(TopicKind::Readings);
        let published = transport
            .publish(&topic, payload.as_bytes(), false)
            .await;
        if published {
            info!("workload: battery_mv={} published", millivolts);
        }
        published
    }
}
