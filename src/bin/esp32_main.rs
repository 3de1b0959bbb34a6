//! ESP32 I/O board bring-up.
//!
//! Brings up the shared I2C bus, registers the character device, initializes
//! the PCA9685 with its flush worker and then sweeps the outputs so the
//! wiring can be checked by eye.
//!
//! # Build
//!
//! ```bash
//! cargo build --release --features esp32 --bin esp32_main
//! espflash flash --monitor target/xtensa-esp32-espidf/release/esp32_main
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use esp_idf_hal::delay::FreeRtos;
use esp_idf_svc::log::EspLogger;
use log::{info, warn};
use rs_iobus::hal::esp32::{pins, Esp32I2cMaster};
use rs_iobus::traits::PwmOutput;
use rs_iobus::{
    BusCharDevice, BusConfig, Config, ControlRequest, Message, Pca9685, Pca9685Config, SharedBus,
};

/// Sweep step in counts
const SWEEP_STEP: u32 = 256;

/// Delay between sweep steps
const SWEEP_INTERVAL_MS: u64 = 50;

fn main() -> anyhow::Result<()> {
    esp_idf_sys::link_patches();
    EspLogger::initialize_default();

    info!("================================");
    info!("  rs-iobus I/O board");
    info!("================================");

    // =========================================================================
    // Configuration
    // =========================================================================
    let config = Config::default()
        .with_bus(BusConfig::default().with_pins(pins::I2C_SDA, pins::I2C_SCL))
        .with_pca9685(Pca9685Config::default().with_address(pins::PCA9685_ADDR));

    // =========================================================================
    // Shared bus + character device
    // =========================================================================
    let bus = Arc::new(SharedBus::new(
        Esp32I2cMaster::new(pins::I2C_PORT),
        config.bus.clone(),
    ));
    bus.initialize()?;
    let dev = BusCharDevice::new(Arc::clone(&bus), &config.char_device);
    info!("[OK] Bus ready, {} registered", dev.path());

    // =========================================================================
    // PCA9685
    // =========================================================================
    let pwm = Pca9685::new(Arc::clone(&bus), config.pca9685.clone()).initialize(&mut FreeRtos)?;
    info!(
        "[OK] PCA9685 at {:02x} ready (prescaler {})",
        pwm.address(),
        pwm.prescaler()
    );

    // Read PRE_SCALE back through the char device as a wiring check
    let fd = dev.open(config.char_device.path.as_str())?;
    dev.control_request(fd, ControlRequest::BindAddress(pwm.address()))?;
    let mut prescale = [0u8; 1];
    let mut messages = [Message::write(&[0xFE]), Message::read(&mut prescale)];
    dev.control_request(fd, ControlRequest::AtomicTransfer(&mut messages))?;
    dev.close(fd)?;
    if prescale[0] != pwm.prescaler() {
        warn!(
            "PRE_SCALE reads back {} (expected {})",
            prescale[0],
            pwm.prescaler()
        );
    }

    // =========================================================================
    // Output sweep
    // =========================================================================
    let mut channels = pwm.channels();
    let mut duty = 0u32;
    loop {
        for (i, channel) in channels.iter_mut().enumerate() {
            let offset = (i as u32) * SWEEP_STEP;
            channel.set_duty((duty + offset) % (channel.get_period() + 1))?;
        }
        duty = (duty + SWEEP_STEP) % (pwm.channel(0)?.get_period() + 1);

        let stats = pwm.stats();
        if stats.failures > 0 && stats.passes % 100 == 0 {
            warn!("{} channel writes failed so far", stats.failures);
        }
        thread::sleep(Duration::from_millis(SWEEP_INTERVAL_MS));
    }
}
