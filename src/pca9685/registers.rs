//! PCA9685 register map and pure encode/decode helpers.
//!
//! Nothing in here touches the bus. Mode registers are explicit bit masks
//! packed into and out of one byte; output registers are 4-byte groups of
//! little-endian 12-bit counters with a "full" override flag in bit 12.
//!
//! ```text
//! LEDn_ON_L   LEDn_ON_H        LEDn_OFF_L  LEDn_OFF_H
//! on[7:0]     ---F on[11:8]    off[7:0]    ---F off[11:8]
//!                ^ full on                    ^ full off
//! ```

use crate::error::{InvalidArgument, Result};

use super::{MAX_PWM_COUNTS, NUM_CHANNELS};

/// MODE1 register address.
pub const MODE1: u8 = 0x00;
/// MODE2 register address.
pub const MODE2: u8 = 0x01;
/// First output register (LED0_ON_L). Each channel takes four registers.
pub const LED0_ON_L: u8 = 0x06;
/// ALL_LED_ON_L register address.
pub const ALL_LED_ON_L: u8 = 0xFA;
/// ALL_LED_OFF_L register address.
pub const ALL_LED_OFF_L: u8 = 0xFC;
/// Prescaler register address. Writable only while MODE1.SLEEP is set.
pub const PRE_SCALE: u8 = 0xFE;

/// Smallest prescaler value the chip accepts.
pub const PRESCALE_MIN: u8 = 3;
/// Largest prescaler value.
pub const PRESCALE_MAX: u8 = 255;

/// Full on/off flag inside a 16-bit ON or OFF counter.
pub const FULL_FLAG: u16 = 0x1000;

const COUNT_MASK: u16 = 0x0fff;

/// Per-channel phase offset in counts.
pub const PHASE_STEP: u16 = 256;

// ============================================================================
// MODE1 / MODE2
// ============================================================================

/// MODE1 register, one field per bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mode1 {
    /// Restart the PWM engine after sleep.
    pub restart: bool,
    /// Use the EXTCLK pin.
    pub external_clock: bool,
    /// Register auto-increment.
    pub auto_increment: bool,
    /// Low power mode, oscillator off.
    pub sleep: bool,
    /// Respond to sub-address 1.
    pub sub_address_1: bool,
    /// Respond to sub-address 2.
    pub sub_address_2: bool,
    /// Respond to sub-address 3.
    pub sub_address_3: bool,
    /// Respond to the all-call address.
    pub all_call: bool,
}

impl Mode1 {
    /// RESTART bit.
    pub const RESTART: u8 = 0x80;
    /// EXTCLK bit.
    pub const EXTCLK: u8 = 0x40;
    /// AI bit.
    pub const AI: u8 = 0x20;
    /// SLEEP bit.
    pub const SLEEP: u8 = 0x10;
    /// SUB1 bit.
    pub const SUB1: u8 = 0x08;
    /// SUB2 bit.
    pub const SUB2: u8 = 0x04;
    /// SUB3 bit.
    pub const SUB3: u8 = 0x02;
    /// ALLCALL bit.
    pub const ALLCALL: u8 = 0x01;

    /// Unpacks a register byte.
    pub const fn from_bits(bits: u8) -> Self {
        Self {
            restart: bits & Self::RESTART != 0,
            external_clock: bits & Self::EXTCLK != 0,
            auto_increment: bits & Self::AI != 0,
            sleep: bits & Self::SLEEP != 0,
            sub_address_1: bits & Self::SUB1 != 0,
            sub_address_2: bits & Self::SUB2 != 0,
            sub_address_3: bits & Self::SUB3 != 0,
            all_call: bits & Self::ALLCALL != 0,
        }
    }

    /// Packs into a register byte.
    pub const fn bits(self) -> u8 {
        let mut bits = 0;
        if self.restart {
            bits |= Self::RESTART;
        }
        if self.external_clock {
            bits |= Self::EXTCLK;
        }
        if self.auto_increment {
            bits |= Self::AI;
        }
        if self.sleep {
            bits |= Self::SLEEP;
        }
        if self.sub_address_1 {
            bits |= Self::SUB1;
        }
        if self.sub_address_2 {
            bits |= Self::SUB2;
        }
        if self.sub_address_3 {
            bits |= Self::SUB3;
        }
        if self.all_call {
            bits |= Self::ALLCALL;
        }
        bits
    }

    /// Restart requested, everything else cleared.
    pub const fn reset() -> Self {
        Self::from_bits(Self::RESTART)
    }

    /// Oscillator off so the prescaler can be written.
    pub const fn sleep() -> Self {
        Self::from_bits(Self::SLEEP)
    }

    /// Awake with register auto-increment, ready for multi-byte channel writes.
    pub const fn running() -> Self {
        Self::from_bits(Self::RESTART | Self::AI)
    }
}

impl Default for Mode1 {
    /// Power-on value (SLEEP | ALLCALL).
    fn default() -> Self {
        Self::from_bits(0x11)
    }
}

/// MODE2 register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mode2 {
    /// Invert output logic.
    pub invert: bool,
    /// Outputs change on ACK instead of STOP.
    pub update_on_ack: bool,
    /// Totem-pole outputs; open-drain when false.
    pub totem_pole: bool,
    /// Output state while OE is high (2 bits).
    pub output_not_enabled: u8,
}

impl Mode2 {
    /// INVRT bit.
    pub const INVRT: u8 = 0x10;
    /// OCH bit.
    pub const OCH: u8 = 0x08;
    /// OUTDRV bit.
    pub const OUTDRV: u8 = 0x04;
    /// OUTNE field mask.
    pub const OUTNE: u8 = 0x03;

    /// Unpacks a register byte.
    pub const fn from_bits(bits: u8) -> Self {
        Self {
            invert: bits & Self::INVRT != 0,
            update_on_ack: bits & Self::OCH != 0,
            totem_pole: bits & Self::OUTDRV != 0,
            output_not_enabled: bits & Self::OUTNE,
        }
    }

    /// Packs into a register byte.
    pub const fn bits(self) -> u8 {
        let mut bits = self.output_not_enabled & Self::OUTNE;
        if self.invert {
            bits |= Self::INVRT;
        }
        if self.update_on_ack {
            bits |= Self::OCH;
        }
        if self.totem_pole {
            bits |= Self::OUTDRV;
        }
        bits
    }
}

impl Default for Mode2 {
    /// Power-on value (totem-pole).
    fn default() -> Self {
        Self::from_bits(0x04)
    }
}

// ============================================================================
// Output registers
// ============================================================================

/// One channel's ON/OFF register group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutputRegisters {
    /// ON counter with the full-on flag in bit 12.
    pub on: u16,
    /// OFF counter with the full-off flag in bit 12.
    pub off: u16,
}

impl OutputRegisters {
    /// Encodes `duty` for `channel`.
    ///
    /// - `duty >= 4096`: full on, off counter 0.
    /// - `duty == 0`: full off.
    /// - otherwise the rising edge is staggered by `channel * 256` counts and
    ///   the falling edge follows `duty` counts later, modulo the period.
    pub fn for_duty(channel: usize, duty: u32) -> Self {
        if duty >= MAX_PWM_COUNTS {
            Self {
                on: FULL_FLAG,
                off: 0,
            }
        } else if duty == 0 {
            Self {
                on: 0,
                off: FULL_FLAG,
            }
        } else {
            let on = ((channel as u32 * u32::from(PHASE_STEP)) % MAX_PWM_COUNTS) as u16;
            let off = ((u32::from(on) + duty) % MAX_PWM_COUNTS) as u16;
            Self { on, off }
        }
    }

    /// Full-on flag.
    pub fn full_on(&self) -> bool {
        self.on & FULL_FLAG != 0
    }

    /// Full-off flag.
    pub fn full_off(&self) -> bool {
        self.off & FULL_FLAG != 0
    }

    /// Duty cycle the chip produces for these registers.
    ///
    /// Full off wins over full on, and both win over the counters.
    pub fn duty(&self) -> u32 {
        if self.full_off() {
            0
        } else if self.full_on() {
            MAX_PWM_COUNTS
        } else {
            let on = u32::from(self.on & COUNT_MASK);
            let off = u32::from(self.off & COUNT_MASK);
            (off + MAX_PWM_COUNTS - on) % MAX_PWM_COUNTS
        }
    }

    /// Register bytes in bus order (ON_L, ON_H, OFF_L, OFF_H).
    pub fn to_bytes(self) -> [u8; 4] {
        let [on_l, on_h] = self.on.to_le_bytes();
        let [off_l, off_h] = self.off.to_le_bytes();
        [on_l, on_h, off_l, off_h]
    }

    /// Parses register bytes in bus order.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            on: u16::from_le_bytes([bytes[0], bytes[1]]),
            off: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }

    /// Decodes a register group read back from the chip into a duty value.
    pub fn decode(bytes: [u8; 4]) -> u32 {
        Self::from_bytes(bytes).duty()
    }
}

/// First register of `channel`'s output group.
pub fn channel_base(channel: usize) -> Result<u8> {
    if channel >= NUM_CHANNELS {
        return Err(InvalidArgument::Channel(channel).into());
    }
    Ok(LED0_ON_L + (channel as u8) * 4)
}

/// Complete write payload for one channel: base register then four data bytes.
pub fn channel_frame(channel: usize, duty: u32) -> Result<[u8; 5]> {
    let base = channel_base(channel)?;
    let [a, b, c, d] = OutputRegisters::for_duty(channel, duty).to_bytes();
    Ok([base, a, b, c, d])
}

/// Two-byte payload writing one register.
pub const fn register_frame(register: u8, value: u8) -> [u8; 2] {
    [register, value]
}

// ============================================================================
// Prescaler
// ============================================================================

/// Prescaler byte producing `frequency_hz` from `oscillator_hz`.
///
/// `round(oscillator / (4096 * frequency)) - 1`, rejected when the result
/// falls outside `3..=255`. With the internal 25 MHz oscillator that limits
/// the output to 24..=1743 Hz.
pub fn compute_prescaler(oscillator_hz: u32, frequency_hz: u32) -> Result<u8> {
    if frequency_hz == 0 {
        return Err(InvalidArgument::Frequency(frequency_hz).into());
    }
    let divisor = u64::from(MAX_PWM_COUNTS) * u64::from(frequency_hz);
    let rounded = (u64::from(oscillator_hz) + divisor / 2) / divisor;
    match rounded.checked_sub(1) {
        Some(value) if (u64::from(PRESCALE_MIN)..=u64::from(PRESCALE_MAX)).contains(&value) => {
            Ok(value as u8)
        }
        _ => Err(InvalidArgument::Frequency(frequency_hz).into()),
    }
}

/// Output frequency produced by a prescaler value, truncated to whole Hz.
pub fn output_frequency(oscillator_hz: u32, prescaler: u8) -> u32 {
    let divisor = u64::from(MAX_PWM_COUNTS) * (u64::from(prescaler) + 1);
    (u64::from(oscillator_hz) / divisor) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use proptest::prelude::*;

    const OSC: u32 = 25_000_000;

    // =========================================================================
    // Mode registers
    // =========================================================================

    #[test]
    fn mode1_known_values() {
        assert_eq!(Mode1::reset().bits(), 0x80);
        assert_eq!(Mode1::sleep().bits(), 0x10);
        assert_eq!(Mode1::running().bits(), 0xA0);
        assert_eq!(Mode1::default().bits(), 0x11);
        assert!(Mode1::running().auto_increment);
        assert!(!Mode1::running().sleep);
    }

    #[test]
    fn mode2_known_values() {
        assert_eq!(Mode2::default().bits(), 0x04);
        let mode = Mode2 {
            invert: true,
            update_on_ack: true,
            totem_pole: false,
            output_not_enabled: 0,
        };
        assert_eq!(mode.bits(), 0x18);
    }

    proptest! {
        #[test]
        fn mode1_bits_roundtrip(bits in any::<u8>()) {
            prop_assert_eq!(Mode1::from_bits(bits).bits(), bits);
        }

        #[test]
        fn mode2_keeps_defined_bits(bits in any::<u8>()) {
            prop_assert_eq!(Mode2::from_bits(bits).bits(), bits & 0x1f);
        }
    }

    // =========================================================================
    // Output encoding
    // =========================================================================

    #[test]
    fn full_on_bytes() {
        assert_eq!(OutputRegisters::for_duty(3, 4096).to_bytes(), [0x00, 0x10, 0x00, 0x00]);
        // Clamped
        assert_eq!(OutputRegisters::for_duty(3, 9000).to_bytes(), [0x00, 0x10, 0x00, 0x00]);
    }

    #[test]
    fn full_off_bytes() {
        assert_eq!(OutputRegisters::for_duty(3, 0).to_bytes(), [0x00, 0x00, 0x00, 0x10]);
    }

    #[test]
    fn staggered_bytes() {
        // channel 2, duty 1000: on=512 (0x200), off=1512 (0x5E8)
        assert_eq!(OutputRegisters::for_duty(2, 1000).to_bytes(), [0x00, 0x02, 0xE8, 0x05]);
        // channel 15, duty 2048: on=3840, off=(3840+2048)%4096=1792
        let regs = OutputRegisters::for_duty(15, 2048);
        assert_eq!((regs.on, regs.off), (3840, 1792));
        assert_eq!(regs.duty(), 2048);
    }

    #[test]
    fn decode_prefers_full_off() {
        assert_eq!(OutputRegisters::decode([0x00, 0x10, 0x00, 0x10]), 0);
        assert_eq!(OutputRegisters::decode([0x00, 0x10, 0x34, 0x02]), 4096);
        assert_eq!(OutputRegisters::decode([0x34, 0x02, 0x00, 0x10]), 0);
    }

    #[test]
    fn channel_frame_targets_group() {
        assert_eq!(channel_base(0), Ok(0x06));
        assert_eq!(channel_base(15), Ok(0x42));
        assert_eq!(channel_frame(1, 0).unwrap()[0], 0x0A);
        assert_eq!(
            channel_base(16),
            Err(Error::InvalidArgument(InvalidArgument::Channel(16)))
        );
    }

    proptest! {
        #[test]
        fn encoding_law(channel in 0usize..16, duty in 1u32..4096) {
            let regs = OutputRegisters::for_duty(channel, duty);
            let on = (channel as u32 * 256) % 4096;
            prop_assert_eq!(u32::from(regs.on), on);
            prop_assert_eq!(u32::from(regs.off), (on + duty) % 4096);
            prop_assert!(!regs.full_on() && !regs.full_off());
            prop_assert_eq!(OutputRegisters::decode(regs.to_bytes()), duty);
        }

        #[test]
        fn full_flags_law(channel in 0usize..16, duty in 4096u32..100_000) {
            prop_assert!(OutputRegisters::for_duty(channel, duty).full_on());
            prop_assert!(OutputRegisters::for_duty(channel, 0).full_off());
        }
    }

    // =========================================================================
    // Prescaler
    // =========================================================================

    #[test]
    fn prescaler_known_pairs() {
        assert_eq!(compute_prescaler(OSC, 1000), Ok(5));
        assert_eq!(compute_prescaler(OSC, 200), Ok(30));
        assert_eq!(compute_prescaler(OSC, 50), Ok(121));
    }

    #[test]
    fn prescaler_range_limits() {
        assert_eq!(compute_prescaler(OSC, 24), Ok(253));
        assert_eq!(compute_prescaler(OSC, 1743), Ok(3));
        for hz in [0, 23, 1744, 100_000] {
            assert_eq!(
                compute_prescaler(OSC, hz),
                Err(Error::InvalidArgument(InvalidArgument::Frequency(hz)))
            );
        }
    }

    #[test]
    fn output_frequency_inverts_prescaler() {
        assert_eq!(output_frequency(OSC, 121), 50);
        assert_eq!(output_frequency(OSC, 5), 1017);
    }

    proptest! {
        #[test]
        fn prescaler_always_in_range(hz in 1u32..5000) {
            if let Ok(pre) = compute_prescaler(OSC, hz) {
                prop_assert!(pre >= PRESCALE_MIN);
            }
        }
    }
}
