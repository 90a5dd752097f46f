//! 16-channel PWM/GPIO expander driver (PCA9685-class).
//!
//! The expander owns the global oscillator frequency and a 16-slot channel
//! arena. Channels are handed out as typed handles — [`PwmChannel`] for
//! 12-bit PWM outputs, [`PinChannel`] for binary outputs — each backed by its
//! own [`RefCellDevice`] onto the shared bus, the same sharing idiom the rest
//! of the firmware uses for peripherals on one I2C segment. A slot's kind is
//! fixed at first registration and enforced on every re-request.

use core::cell::RefCell;

use embedded_hal::{delay::DelayNs, i2c::I2c};
use embedded_hal_bus::i2c::RefCellDevice;

use super::{bus::RegDevice, ChannelKind, Error};

const MODE1: u8 = 0x00;
const PRESCALE: u8 = 0xFE;

const MIN_PRESCALE: i32 = 0x03;
const MAX_PRESCALE: i32 = 0xFF;

const LED_BASE_ADDR: u8 = 0x06;
const LED_SIZE: u8 = 0x04;
const ALL_LED_START: u8 = 0xFA;

/// Bit 12 of either 16-bit channel field forces the output fully on or
/// fully off, bypassing the PWM comparator.
const ALL_BIT: u16 = 12;
const FULL_ON: u16 = 1 << ALL_BIT;

/// Internal oscillator frequency. Boards with an external oscillator pass
/// their clock via [`Pca9685::with_clock`].
const OSC_CLOCK: f32 = 25_000_000.0;

/// Number of output channels on the device.
pub const CHANNELS: u8 = 16;

/// Largest 12-bit duty value; doubles as the "always on" sentinel.
pub const MAX_DUTY: u16 = 4095;

/// "Always on" sentinel in the legacy 10-bit duty range.
pub const LEGACY_MAX_DUTY: u16 = 1023;

fn channel_base(channel: u8) -> u8 {
    LED_BASE_ADDR + LED_SIZE * channel
}

/// `floor(clock / 4096 / freq - 0.5)`, the divisor that makes the 12-bit
/// counter wrap at the requested rate.
fn prescale_for(clock: f32, freq_hz: f32) -> i32 {
    libm::floorf(clock / 4096.0 / freq_hz - 0.5) as i32
}

/// PCA9685-class 16-channel PWM/GPIO expander.
pub struct Pca9685<'a, I2C> {
    bus: &'a RefCell<I2C>,
    dev: RegDevice<RefCellDevice<'a, I2C>>,
    clock: f32,
    prescale: u8,
    freq: Option<f32>,
    slots: [Option<ChannelKind>; CHANNELS as usize],
}

impl<'a, I2C, E> Pca9685<'a, I2C>
where
    I2C: I2c<Error = E>,
{
    /// Side-effect-free constructor; nothing touches the bus until
    /// [`init`](Self::init).
    pub fn new(bus: &'a RefCell<I2C>, address: u8) -> Self {
        Self {
            bus,
            dev: RegDevice::new(RefCellDevice::new(bus), address),
            clock: OSC_CLOCK,
            prescale: 0,
            freq: None,
            slots: [None; CHANNELS as usize],
        }
    }

    /// Use an external oscillator clock instead of the 25 MHz internal one.
    pub fn with_clock(mut self, clock_hz: f32) -> Self {
        self.clock = clock_hz;
        self
    }

    /// Put the device in a known state: mode register cleared, all 16
    /// channels forced off, output frequency programmed.
    pub fn init(&mut self, freq_hz: f32, delay: &mut impl DelayNs) -> Result<(), Error<E>> {
        self.dev.write_reg(MODE1, 0x00)?;
        self.dev.write_block(ALL_LED_START, &[0; LED_SIZE as usize])?;
        self.set_frequency(freq_hz, delay)?;
        tracing::info!(
            "pwm expander up at {} Hz (prescale {})",
            freq_hz,
            self.prescale
        );
        Ok(())
    }

    /// Force all channels off and clear the mode register.
    pub fn deinit(&mut self) -> Result<(), Error<E>> {
        self.dev.write_block(ALL_LED_START, &[0; LED_SIZE as usize])?;
        self.dev.write_reg(MODE1, 0x00)
    }

    /// Program the PWM output frequency.
    ///
    /// Fails with [`Error::InvalidPrescale`] when the computed divisor falls
    /// outside `[3, 255]` — roughly 24 Hz to 1526 Hz on the internal clock.
    pub fn set_frequency(&mut self, freq_hz: f32, delay: &mut impl DelayNs) -> Result<(), Error<E>> {
        let prescale = prescale_for(self.clock, freq_hz);
        if !(MIN_PRESCALE..=MAX_PRESCALE).contains(&prescale) {
            return Err(Error::InvalidPrescale(prescale));
        }
        let prescale = prescale as u8;

        // Prescale is only writable while the oscillator is stopped.
        let orig_mode = self.dev.read_reg(MODE1)?;
        let sleep_mode = (orig_mode & 0x7F) | 0x10;
        self.dev.write_reg(MODE1, sleep_mode)?;
        self.dev.write_reg(PRESCALE, prescale)?;
        self.dev.write_reg(MODE1, orig_mode)?;

        // The oscillator needs a moment before restart may be asserted.
        delay.delay_us(5);
        self.dev.write_reg(MODE1, orig_mode | 0xA1)?;

        self.prescale = prescale;
        self.freq = Some(freq_hz);
        tracing::debug!("prescale {} for {} Hz", prescale, freq_hz);
        Ok(())
    }

    /// The frequency cached by the last [`set_frequency`](Self::set_frequency),
    /// or 0 Hz if it was never set.
    ///
    /// The cache is only trusted while the device's live prescale register
    /// still holds the value we wrote; if some other agent reprogrammed it
    /// out of band this fails with [`Error::PrescaleChanged`].
    pub fn frequency(&mut self) -> Result<f32, Error<E>> {
        let Some(freq) = self.freq else {
            return Ok(0.0);
        };

        let device = self.dev.read_reg(PRESCALE)?;
        if device == self.prescale {
            Ok(freq)
        } else {
            tracing::warn!("prescale changed out of band: {} != {}", device, self.prescale);
            Err(Error::PrescaleChanged {
                cached: self.prescale,
                device,
            })
        }
    }

    /// Check a slot for the requested kind. `Ok(true)` means the slot is
    /// unregistered and the caller performs first-time setup.
    fn claim(&mut self, channel: u8, requested: ChannelKind) -> Result<bool, Error<E>> {
        if channel >= CHANNELS {
            return Err(Error::InvalidChannel(channel));
        }
        match self.slots[channel as usize] {
            None => Ok(true),
            Some(registered) if registered == requested => Ok(false),
            Some(registered) => Err(Error::ChannelTypeMismatch {
                channel,
                registered,
                requested,
            }),
        }
    }

    /// Register `channel` as a PWM output and mint a typed handle for it.
    ///
    /// The first registration zeroes the channel's register block. Further
    /// requests for the same channel mint additional handles onto the same
    /// hardware state; requesting it as a pin fails with
    /// [`Error::ChannelTypeMismatch`].
    pub fn pwm(&mut self, channel: u8) -> Result<PwmChannel<'a, I2C>, Error<E>> {
        let fresh = self.claim(channel, ChannelKind::Pwm)?;
        let mut handle = PwmChannel {
            dev: RegDevice::new(RefCellDevice::new(self.bus), self.dev.address()),
            channel,
            legacy: false,
        };
        if fresh {
            handle.reset()?;
            self.slots[channel as usize] = Some(ChannelKind::Pwm);
        }
        Ok(handle)
    }

    /// Register `channel` as a binary output and mint a typed handle for it.
    ///
    /// Same exclusivity rules as [`pwm`](Self::pwm).
    pub fn pin(&mut self, channel: u8) -> Result<PinChannel<'a, I2C>, Error<E>> {
        let fresh = self.claim(channel, ChannelKind::Pin)?;
        let mut handle = PinChannel {
            dev: RegDevice::new(RefCellDevice::new(self.bus), self.dev.address()),
            channel,
        };
        if fresh {
            handle.reset()?;
            self.slots[channel as usize] = Some(ChannelKind::Pin);
        }
        Ok(handle)
    }

    /// Zero the channel's registers and free its slot for re-registration
    /// with a different kind.
    pub fn release_pwm(&mut self, mut handle: PwmChannel<'a, I2C>) -> Result<(), Error<E>> {
        handle.reset()?;
        self.slots[handle.channel as usize] = None;
        Ok(())
    }

    /// Binary-output counterpart of [`release_pwm`](Self::release_pwm).
    pub fn release_pin(&mut self, mut handle: PinChannel<'a, I2C>) -> Result<(), Error<E>> {
        handle.reset()?;
        self.slots[handle.channel as usize] = None;
        Ok(())
    }
}

/// One 12-bit PWM output on the expander.
///
/// The channel's 4-byte register block holds two little-endian 16-bit
/// fields: the counter values at which the output switches on and off within
/// the PWM period. This driver always phase-aligns the duty window at 0, so
/// the off field alone encodes the duty.
pub struct PwmChannel<'a, I2C> {
    dev: RegDevice<RefCellDevice<'a, I2C>>,
    channel: u8,
    legacy: bool,
}

impl<'a, I2C, E> PwmChannel<'a, I2C>
where
    I2C: I2c<Error = E>,
{
    /// Channel index on the expander.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Switch the duty API into the legacy 10-bit range, where 1023 is the
    /// "always on" sentinel.
    pub fn set_legacy(&mut self, legacy: bool) {
        self.legacy = legacy;
    }

    /// Whether the legacy 10-bit duty range is active.
    pub fn legacy(&self) -> bool {
        self.legacy
    }

    /// Zero the channel's register block.
    pub fn reset(&mut self) -> Result<(), Error<E>> {
        self.dev
            .write_block(channel_base(self.channel), &[0; LED_SIZE as usize])
    }

    /// Raw accessor: write the on/off register pair.
    pub fn set_on_off(&mut self, on: u16, off: u16) -> Result<(), Error<E>> {
        let mut payload = [0u8; LED_SIZE as usize];
        payload[..2].copy_from_slice(&on.to_le_bytes());
        payload[2..].copy_from_slice(&off.to_le_bytes());
        self.dev.write_block(channel_base(self.channel), &payload)
    }

    /// Raw accessor: read the on/off register pair.
    pub fn on_off(&mut self) -> Result<(u16, u16), Error<E>> {
        let payload: [u8; LED_SIZE as usize] = self.dev.read_block(channel_base(self.channel))?;
        Ok((
            u16::from_le_bytes([payload[0], payload[1]]),
            u16::from_le_bytes([payload[2], payload[3]]),
        ))
    }

    /// Set the duty cycle.
    ///
    /// `MAX_DUTY` (4095) means "always on" and is encoded through the
    /// force-full-on bit rather than as a counter value. In legacy mode the
    /// sentinel is 1023, 0 stays "always off", and any other value at or
    /// below 1023 is rejected as ambiguous.
    pub fn set_duty(&mut self, duty: u16) -> Result<(), Error<E>> {
        let raw = duty;
        let mut duty = duty;

        if self.legacy {
            if duty == LEGACY_MAX_DUTY {
                duty = MAX_DUTY;
            } else if duty != 0 && duty <= LEGACY_MAX_DUTY {
                return Err(Error::InvalidDuty(raw));
            } else {
                duty = duty.saturating_mul(4);
            }
        }

        if duty > MAX_DUTY {
            return Err(Error::InvalidDuty(raw));
        }

        if duty == MAX_DUTY {
            self.set_on_off(FULL_ON, 0)
        } else {
            self.set_on_off(0, duty)
        }
    }

    /// Read the duty cycle back, inverting the encoding of
    /// [`set_duty`](Self::set_duty).
    pub fn duty(&mut self) -> Result<u16, Error<E>> {
        let (on, off) = self.on_off()?;

        if on == FULL_ON {
            if self.legacy {
                Ok(LEGACY_MAX_DUTY)
            } else {
                Ok(MAX_DUTY)
            }
        } else if self.legacy {
            Ok(off / 4)
        } else {
            Ok(off)
        }
    }
}

/// One binary (fully-on/fully-off) output on the expander.
///
/// Reuses a PWM channel's register layout but only ever toggles the
/// force-full-on bit. `high` and `low` are complementary views of the same
/// stored bit, not independent state.
pub struct PinChannel<'a, I2C> {
    dev: RegDevice<RefCellDevice<'a, I2C>>,
    channel: u8,
}

impl<'a, I2C, E> PinChannel<'a, I2C>
where
    I2C: I2c<Error = E>,
{
    /// Channel index on the expander.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Zero the channel's register block.
    pub fn reset(&mut self) -> Result<(), Error<E>> {
        self.dev
            .write_block(channel_base(self.channel), &[0; LED_SIZE as usize])
    }

    /// Drive the output fully on (`true`) or fully off (`false`).
    pub fn set_value(&mut self, value: bool) -> Result<(), Error<E>> {
        let on: u16 = if value { FULL_ON } else { 0 };
        self.dev
            .write_block(channel_base(self.channel), &on.to_le_bytes())
    }

    /// Read the output state back from the device.
    pub fn value(&mut self) -> Result<bool, Error<E>> {
        let payload: [u8; 2] = self.dev.read_block(channel_base(self.channel))?;
        Ok(u16::from_le_bytes(payload) & FULL_ON != 0)
    }

    /// `set_high(true)` drives the pin high; equivalent to
    /// `set_value(value)`.
    pub fn set_high(&mut self, high: bool) -> Result<(), Error<E>> {
        self.set_value(high)
    }

    /// `set_low(true)` drives the pin low; equivalent to
    /// `set_value(!value)`.
    pub fn set_low(&mut self, low: bool) -> Result<(), Error<E>> {
        self.set_value(!low)
    }

    pub fn is_high(&mut self) -> Result<bool, Error<E>> {
        self.value()
    }

    pub fn is_low(&mut self) -> Result<bool, Error<E>> {
        Ok(!self.value()?)
    }
}
