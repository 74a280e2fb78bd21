#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_time::Timer;
use esp_hal::{
    analog::adc::{Adc, AdcConfig, Attenuation},
    clock::CpuClock,
    timer::timg::TimerGroup,
    usb_serial_jtag::UsbSerialJtag,
};
use hub_core::{
    config::RecoveryConfig,
    controller::{Halt, PowerController, PowerState, Services, check_boot},
    provisioning::Provisioning,
    record::PersistentRecord,
    topics::Topics,
};
use hub_hal_esp32s3::{
    network::{
        WifiConfig,
        mqtt::{MqttConfig, MqttLink, MqttTransport, mqtt_session_loop, refuse_sessions},
        wifi::WifiLink,
    },
    platform::{
        clock::EmbassyClock,
        power::{self, TimerDeepSleep},
    },
    portal::SerialPortal,
    storage::BootRecordStore,
};
use log::{LevelFilter, info, warn};
use static_cell::StaticCell;

use settings::ProvisioningSlot;
use workload::BatteryWorkload;

#[path = "main/settings.rs"]
mod settings;
#[path = "main/workload.rs"]
mod workload;

// Above the publish interval; the session sends no pings of its own.
const MQTT_KEEP_ALIVE_SECS: u16 = 120;

static MQTT_LINK: MqttLink = MqttLink::new();
static NET_RESOURCES: StaticCell<embassy_net::StackResources<4>> = StaticCell::new();
static PROVISIONING: StaticCell<Provisioning> = StaticCell::new();
static TOPICS: StaticCell<Topics> = StaticCell::new();

#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

async fn park_forever() -> ! {
    loop {
        Timer::after_secs(1).await;
    }
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);
    let boot_cause = power::boot_cause();

    // Counted before anything slow so a quick reset still lands in the window.
    // The system timer runs from `esp_hal::init`; the embassy driver is not up yet.
    let recovery = RecoveryConfig::default();
    let store = BootRecordStore::open();
    let record_available = store.is_available();
    let mut record = PersistentRecord::open(store);
    let boot = check_boot(
        &mut record,
        &recovery,
        boot_cause,
        esp_hal::time::Instant::now()
            .duration_since_epoch()
            .as_millis(),
    );

    esp_println::logger::init_logger(LevelFilter::Info);
    esp_println::println!("boot: sensor hub starting");
    info!(
        "boot: cause={} outcome={} crash_cnt={}",
        boot.cause.as_str(),
        boot.outcome.as_str(),
        boot.crash_count
    );

    // esp-radio requires an allocator.
    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 65536);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    if !record_available {
        warn!(
            "boot: counters are volatile this boot (outcome={})",
            boot.outcome.as_str()
        );
    }

    let mut provisioning_slot = ProvisioningSlot::open();
    let provisioning: &'static Provisioning =
        PROVISIONING.init(settings::resolve_provisioning(&mut provisioning_slot));
    let topics: &'static Topics = TOPICS.init(Topics::for_device(&provisioning.device_name));
    info!("boot: topic base={}", topics.base());

    let initial = if provisioning.is_complete() {
        boot.next_state()
    } else {
        warn!("boot: wifi not provisioned; opening the portal");
        PowerState::ConfigMode
    };

    let radio = match esp_radio::init() {
        Ok(radio) => radio,
        Err(err) => {
            info!("esp-radio init failed: {:?}", err);
            park_forever().await
        }
    };

    let (wifi_controller, interfaces) =
        match esp_radio::wifi::new(&radio, peripherals.WIFI, esp_radio::wifi::Config::default()) {
            Ok(parts) => parts,
            Err(err) => {
                info!("wifi peripheral init failed: {:?}", err);
                park_forever().await
            }
        };

    let stack_config = embassy_net::Config::dhcpv4(Default::default());
    let (stack, mut net_runner) = embassy_net::new(
        interfaces.sta,
        stack_config,
        NET_RESOURCES.init(embassy_net::StackResources::<4>::new()),
        0x5A17_2B34_D099_EE11 ^ u64::from(boot.crash_count),
    );

    let wifi = WifiLink::new(
        wifi_controller,
        stack,
        WifiConfig::new(&provisioning.ssid, &provisioning.password),
    );

    let serial = UsbSerialJtag::new(peripherals.USB_DEVICE).into_async();
    let portal = SerialPortal::new(serial, provisioning_slot, provisioning.clone());

    let mut adc_config = AdcConfig::new();
    let battery_pin = adc_config.enable_pin(peripherals.GPIO1, Attenuation::_11dB);
    let adc = Adc::new(peripherals.ADC1, adc_config);

    let services = Services {
        clock: EmbassyClock,
        network: wifi,
        transport: MqttTransport::new(&MQTT_LINK),
        portal,
        sleep: TimerDeepSleep::new(),
        workload: BatteryWorkload::new(adc, battery_pin),
    };
    let mut controller =
        PowerController::after_boot_check(recovery, record, services, topics.clone(), boot);

    let net_future = async {
        net_runner.run().await;
    };

    let mqtt_future = async {
        match settings::broker_endpoint() {
            Some((broker, port)) => {
                let mqtt_config = MqttConfig {
                    broker,
                    port,
                    client_id: topics.base(),
                    keep_alive_secs: MQTT_KEEP_ALIVE_SECS,
                };
                mqtt_session_loop(stack, &MQTT_LINK, mqtt_config, topics).await
            }
            None => refuse_sessions(&MQTT_LINK).await,
        }
    };

    let power_future = async {
        let halt = controller.run(initial).await;
        match halt {
            Halt::Slept { seconds } => warn!("power: woke from a {}s sleep without reset", seconds),
            Halt::Restart(reason) => info!("power: restarting reason={}", reason.as_str()),
        }
        Timer::after_millis(recovery.sleep_settle_ms).await;
        power::restart()
    };

    let _ = embassy_futures::join::join3(net_future, mqtt_future, power_future).await;
    unreachable!()
}
