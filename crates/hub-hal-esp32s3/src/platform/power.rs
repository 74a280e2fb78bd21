use esp_hal::{
    peripherals::LPWR,
    rtc_cntl::{Rtc, SocResetReason, reset_reason, sleep::TimerWakeupSource, wakeup_cause},
    system::{Cpu, SleepSource},
};
use hub_core::platform::{BootCause, SleepControl, SleepError};
use log::info;

/// Classifies the current boot from the SoC reset reason and wakeup cause.
///
/// Only a deep-sleep reset whose wakeup source is the RTC timer counts as a
/// timer wake.
pub fn boot_cause() -> BootCause {
    let reason = reset_reason(Cpu::ProCpu);
    let wakeup = wakeup_cause();
    info!("boot: reset_reason={:?} wakeup_cause={:?}", reason, wakeup);

    match reason {
        Some(SocResetReason::CoreDeepSleep) if matches!(wakeup, SleepSource::Timer) => {
            BootCause::TimerWake
        }
        Some(SocResetReason::ChipPowerOn) => BootCause::PowerOn,
        Some(SocResetReason::CoreSw) => BootCause::SoftwareRestart,
        Some(SocResetReason::CoreMwdt0 | SocResetReason::CoreRtcWdt | SocResetReason::SysRtcWdt) => {
            BootCause::Watchdog
        }
        Some(SocResetReason::SysBrownOut) => BootCause::Brownout,
        _ => BootCause::Other,
    }
}

/// Deep sleep with the RTC timer as the only wake source.
#[derive(Debug, Default)]
pub struct TimerDeepSleep;

impl TimerDeepSleep {
    pub const fn new() -> Self {
        Self
    }
}

impl SleepControl for TimerDeepSleep {
    fn enter_deep_sleep(&mut self, seconds: u32) -> Result<(), SleepError> {
        if seconds == 0 {
            return Err(SleepError::WakeSourceRejected);
        }

        let mut rtc = Rtc::new(unsafe { LPWR::steal() });
        let timer = TimerWakeupSource::new(core::time::Duration::from_secs(seconds as u64));
        rtc.sleep_deep(&[&timer]);
    }
}

/// Resets the SoC.
pub fn restart() -> ! {
    esp_hal::system::software_reset()
}
