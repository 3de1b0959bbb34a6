//! ESP-IDF legacy I2C master driver backend.
//!
//! Each lowered command list becomes one `i2c_cmd_link`: the same primitive
//! steps, queued and then executed with `i2c_master_cmd_begin`.

use core::time::Duration;

use esp_idf_hal::delay::TickType;
use esp_idf_sys::{
    esp_err_t, i2c_ack_type_t, i2c_ack_type_t_I2C_MASTER_ACK, i2c_ack_type_t_I2C_MASTER_NACK,
    i2c_cmd_handle_t, i2c_cmd_link_create, i2c_cmd_link_delete, i2c_config_t,
    i2c_driver_install, i2c_master_cmd_begin, i2c_master_read, i2c_master_start,
    i2c_master_stop, i2c_master_write, i2c_master_write_byte, i2c_mode_t_I2C_MODE_MASTER,
    i2c_param_config, i2c_port_t,
};
use log::{debug, info};

use crate::config::BusConfig;
use crate::error::BusFault;
use crate::traits::{Ack, Command, I2cMaster};

const ESP_OK: esp_err_t = 0;
const ESP_FAIL: esp_err_t = -1;
const ESP_ERR_NO_MEM: esp_err_t = 0x101;
const ESP_ERR_TIMEOUT: esp_err_t = 0x107;

/// I2C master on one ESP32 controller port.
///
/// # Example
///
/// ```ignore
/// use rs_iobus::hal::esp32::Esp32I2cMaster;
/// use rs_iobus::{BusConfig, SharedBus};
///
/// let bus = SharedBus::new(Esp32I2cMaster::new(0), BusConfig::default());
/// bus.initialize()?;
/// ```
pub struct Esp32I2cMaster {
    port: i2c_port_t,
    installed: bool,
}

impl Esp32I2cMaster {
    /// Master on controller `port` (0 or 1). Nothing is configured yet.
    pub fn new(port: i2c_port_t) -> Self {
        Self {
            port,
            installed: false,
        }
    }
}

/// Owned command link, deleted on drop.
struct CmdLink(i2c_cmd_handle_t);

impl CmdLink {
    fn create() -> Result<Self, BusFault> {
        // SAFETY: allocation only; null is checked below.
        let handle = unsafe { i2c_cmd_link_create() };
        if handle.is_null() {
            return Err(BusFault::Driver(ESP_ERR_NO_MEM));
        }
        Ok(Self(handle))
    }
}

impl Drop for CmdLink {
    fn drop(&mut self) {
        // SAFETY: handle came from i2c_cmd_link_create and is deleted once.
        unsafe { i2c_cmd_link_delete(self.0) };
    }
}

fn check(err: esp_err_t) -> Result<(), BusFault> {
    if err == ESP_OK {
        Ok(())
    } else {
        Err(BusFault::Driver(err))
    }
}

fn ack_type(ack: Ack) -> i2c_ack_type_t {
    match ack {
        Ack::Ack => i2c_ack_type_t_I2C_MASTER_ACK,
        Ack::Nack => i2c_ack_type_t_I2C_MASTER_NACK,
    }
}

impl I2cMaster for Esp32I2cMaster {
    fn configure(&mut self, config: &BusConfig) -> Result<(), BusFault> {
        let mut params = i2c_config_t {
            mode: i2c_mode_t_I2C_MODE_MASTER,
            sda_io_num: config.sda_pin,
            scl_io_num: config.scl_pin,
            sda_pullup_en: config.internal_pullups,
            scl_pullup_en: config.internal_pullups,
            ..Default::default()
        };
        params.__bindgen_anon_1.master.clk_speed = config.clock_hz;

        info!(
            "[I2C] Installing master driver on port {} (sda:{}, scl:{})",
            self.port, config.sda_pin, config.scl_pin
        );
        // SAFETY: params is fully initialized and outlives the call.
        check(unsafe { i2c_param_config(self.port, &params) })?;
        if !self.installed {
            // SAFETY: master mode needs no slave buffers.
            check(unsafe { i2c_driver_install(self.port, i2c_mode_t_I2C_MODE_MASTER, 0, 0, 0) })?;
            self.installed = true;
        }
        Ok(())
    }

    fn run(&mut self, commands: &mut [Command<'_>], timeout: Duration) -> Result<(), BusFault> {
        let link = CmdLink::create()?;
        let mut target = 0u8;

        for command in commands.iter_mut() {
            // SAFETY: the link is valid and every buffer outlives
            // i2c_master_cmd_begin below, which consumes the queued steps.
            let err = unsafe {
                match command {
                    Command::Start => i2c_master_start(link.0),
                    Command::Address { address, direction } => {
                        target = *address;
                        i2c_master_write_byte(link.0, direction.address_byte(*address), true)
                    }
                    Command::Write(bytes) => {
                        i2c_master_write(link.0, bytes.as_ptr(), bytes.len(), true)
                    }
                    Command::Read { buffer, ack } => {
                        i2c_master_read(link.0, buffer.as_mut_ptr(), buffer.len(), ack_type(*ack))
                    }
                    Command::Stop => i2c_master_stop(link.0),
                }
            };
            check(err)?;
        }

        let ticks = TickType::from(timeout).ticks();
        // SAFETY: link holds a complete command sequence.
        match unsafe { i2c_master_cmd_begin(self.port, link.0, ticks) } {
            ESP_OK => Ok(()),
            ESP_FAIL => {
                debug!("[I2C addr:{:02x}] NACK", target);
                Err(BusFault::Nack { address: target })
            }
            ESP_ERR_TIMEOUT => Err(BusFault::Timeout),
            err => Err(BusFault::Driver(err)),
        }
    }
}
