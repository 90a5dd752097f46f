//! H-bridge DC motor drivers composed from expander channels.
//!
//! A motor is one PWM channel (bridge enable / speed) plus two binary
//! channels (bridge direction inputs). [`Motor`] exposes a continuous signed
//! speed; [`DirectionalMotor`] exposes the raw two-bit direction code for
//! bridges driven that way. [`MotorShield`] wires four motors to the fixed
//! channel assignment of the Adafruit-style shield board.

use core::cell::RefCell;

use embedded_hal::{delay::DelayNs, i2c::I2c};
use serde::{Deserialize, Serialize};

use super::{
    expander::{Pca9685, PinChannel, PwmChannel, MAX_DUTY},
    Error,
};

/// (pwm, in1, in2) expander channels for each motor header on the shield.
const MOTOR_PINS: [(u8, u8, u8); 4] = [(8, 9, 10), (13, 12, 11), (2, 3, 4), (7, 6, 5)];

/// PWM frequency the shield's H-bridges are driven at.
const SHIELD_FREQ_HZ: f32 = 1600.0;

/// Motor headers on the shield.
pub const MOTORS: u8 = 4;

/// H-bridge state as a two-bit direction code: in1 is bit 0, in2 is bit 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Direction {
    /// Both bridge inputs low; the motor coasts.
    Freewheel = 0,
    Forward = 1,
    Backward = 2,
    /// Both bridge inputs high; the windings are shorted.
    Brake = 3,
}

impl Direction {
    /// The raw two-bit code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a two-bit code; `None` above 3.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Freewheel),
            1 => Some(Self::Forward),
            2 => Some(Self::Backward),
            3 => Some(Self::Brake),
            _ => None,
        }
    }
}

/// Swap forward and backward within the two-bit code; freewheel and brake
/// pass through unchanged.
fn inverted_code(code: u8) -> u8 {
    if code == Direction::Forward.code() || code == Direction::Backward.code() {
        !code & 0b11
    } else {
        code
    }
}

/// DC motor with a continuous signed speed in `[-1, 1]`.
pub struct Motor<'a, I2C> {
    pwm: PwmChannel<'a, I2C>,
    in1: PinChannel<'a, I2C>,
    in2: PinChannel<'a, I2C>,
    invert: bool,
}

impl<'a, I2C, E> Motor<'a, I2C>
where
    I2C: I2c<Error = E>,
{
    /// Compose a motor from its bridge channels.
    pub fn new(
        pwm: PwmChannel<'a, I2C>,
        in1: PinChannel<'a, I2C>,
        in2: PinChannel<'a, I2C>,
    ) -> Self {
        Self {
            pwm,
            in1,
            in2,
            invert: false,
        }
    }

    /// Swap the motor's forward and backward senses (wiring fix-up).
    pub fn set_invert(&mut self, invert: bool) {
        self.invert = invert;
    }

    pub fn invert(&self) -> bool {
        self.invert
    }

    /// Drive the motor at `speed` in `[-1, 1]`; the sign selects the bridge
    /// direction, 0 freewheels.
    pub fn set_speed(&mut self, speed: f32) -> Result<(), Error<E>> {
        if !(-1.0..=1.0).contains(&speed) {
            return Err(Error::InvalidSpeed);
        }

        let speed = if self.invert { -speed } else { speed };

        if speed > 0.0 {
            self.in1.set_high(true)?;
            self.in2.set_low(true)?;
        } else if speed < 0.0 {
            self.in1.set_low(true)?;
            self.in2.set_high(true)?;
        } else {
            self.in1.set_low(true)?;
            self.in2.set_low(true)?;
            return self.pwm.set_duty(0);
        }

        let duty = libm::roundf(MAX_DUTY as f32 * libm::fabsf(speed)) as u16;
        self.pwm.set_duty(duty)
    }

    /// Current duty fraction, or 0 when both direction pins read equal —
    /// freewheeling and braking are indistinguishable from zero here.
    pub fn speed(&mut self) -> Result<f32, Error<E>> {
        if self.in1.value()? == self.in2.value()? {
            return Ok(0.0);
        }
        Ok(self.pwm.duty()? as f32 / MAX_DUTY as f32)
    }

    /// Short the windings with `strength` in `[0, 1]`.
    pub fn set_brake(&mut self, strength: f32) -> Result<(), Error<E>> {
        if !(0.0..=1.0).contains(&strength) {
            return Err(Error::InvalidSpeed);
        }

        self.in1.set_high(true)?;
        self.in2.set_high(true)?;
        let duty = libm::roundf(MAX_DUTY as f32 * strength) as u16;
        self.pwm.set_duty(duty)
    }

    /// Braking duty fraction; 0 unless both bridge inputs are high.
    pub fn brake(&mut self) -> Result<f32, Error<E>> {
        if self.in1.is_high()? && self.in2.is_high()? {
            Ok(self.pwm.duty()? as f32 / MAX_DUTY as f32)
        } else {
            Ok(0.0)
        }
    }
}

/// DC motor driven through discrete two-bit direction codes.
///
/// Speed is set separately through the PWM channel; this variant only
/// switches the bridge inputs.
pub struct DirectionalMotor<'a, I2C> {
    pwm: PwmChannel<'a, I2C>,
    in1: PinChannel<'a, I2C>,
    in2: PinChannel<'a, I2C>,
    invert: bool,
}

impl<'a, I2C, E> DirectionalMotor<'a, I2C>
where
    I2C: I2c<Error = E>,
{
    /// Compose a motor from its bridge channels.
    pub fn new(
        pwm: PwmChannel<'a, I2C>,
        in1: PinChannel<'a, I2C>,
        in2: PinChannel<'a, I2C>,
    ) -> Self {
        Self {
            pwm,
            in1,
            in2,
            invert: false,
        }
    }

    /// Swap the motor's forward and backward senses (wiring fix-up).
    pub fn set_invert(&mut self, invert: bool) {
        self.invert = invert;
    }

    pub fn invert(&self) -> bool {
        self.invert
    }

    /// Apply a direction: in1 gets bit 0 and in2 gets bit 1 of the
    /// (possibly inverted) code.
    pub fn set_direction(&mut self, direction: Direction) -> Result<(), Error<E>> {
        let mut code = direction.code();
        if self.invert {
            code = inverted_code(code);
        }
        self.in1.set_value(code & 0b01 != 0)?;
        self.in2.set_value(code & 0b10 != 0)
    }

    /// Apply a raw code; fails with [`Error::InvalidDirection`] above 3.
    pub fn set_direction_code(&mut self, code: u8) -> Result<(), Error<E>> {
        let direction = Direction::from_code(code).ok_or(Error::InvalidDirection(code))?;
        self.set_direction(direction)
    }

    /// Read the bridge inputs back as a logical direction, undoing any
    /// inversion.
    pub fn direction(&mut self) -> Result<Direction, Error<E>> {
        let mut code = u8::from(self.in1.value()?) | (u8::from(self.in2.value()?) << 1);
        if self.invert {
            code = inverted_code(code);
        }
        Direction::from_code(code).ok_or(Error::InvalidDirection(code))
    }

    /// Passthrough to the bridge-enable PWM channel.
    pub fn set_duty(&mut self, duty: u16) -> Result<(), Error<E>> {
        self.pwm.set_duty(duty)
    }

    /// Passthrough to the bridge-enable PWM channel.
    pub fn duty(&mut self) -> Result<u16, Error<E>> {
        self.pwm.duty()
    }
}

/// Four-motor H-bridge shield on one PWM expander.
pub struct MotorShield<'a, I2C> {
    pca: Pca9685<'a, I2C>,
    motors: [Option<Motor<'a, I2C>>; MOTORS as usize],
}

impl<'a, I2C, E> MotorShield<'a, I2C>
where
    I2C: I2c<Error = E>,
{
    /// Factory-default address of the shield's expander.
    pub const DEFAULT_ADDRESS: u8 = 0x60;

    /// Side-effect-free constructor; call [`init`](Self::init) before use.
    pub fn new(bus: &'a RefCell<I2C>, address: u8) -> Self {
        Self {
            pca: Pca9685::new(bus, address),
            motors: [None, None, None, None],
        }
    }

    /// Bring the expander up at the shield's drive frequency.
    pub fn init(&mut self, delay: &mut impl DelayNs) -> Result<(), Error<E>> {
        self.pca.init(SHIELD_FREQ_HZ, delay)
    }

    /// The underlying expander, for channels not used by motor headers.
    pub fn expander(&mut self) -> &mut Pca9685<'a, I2C> {
        &mut self.pca
    }

    /// Lazily compose and cache the motor on header `index` (0..=3).
    pub fn motor(&mut self, index: u8) -> Result<&mut Motor<'a, I2C>, Error<E>> {
        if index >= MOTORS {
            return Err(Error::InvalidMotor(index));
        }

        let slot = index as usize;
        if self.motors[slot].is_none() {
            let (pwm_idx, in1_idx, in2_idx) = MOTOR_PINS[slot];
            let pwm = self.pca.pwm(pwm_idx)?;
            let in1 = self.pca.pin(in1_idx)?;
            let in2 = self.pca.pin(in2_idx)?;
            self.motors[slot] = Some(Motor::new(pwm, in1, in2));
        }

        self.motors[slot].as_mut().ok_or(Error::InvalidMotor(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inversion_swaps_only_the_moving_codes() {
        assert_eq!(inverted_code(0b00), 0b00);
        assert_eq!(inverted_code(0b01), 0b10);
        assert_eq!(inverted_code(0b10), 0b01);
        assert_eq!(inverted_code(0b11), 0b11);
    }

    #[test]
    fn direction_codes_round_trip() {
        for code in 0..=3 {
            let d = Direction::from_code(code).unwrap();
            assert_eq!(d.code(), code);
        }
        assert_eq!(Direction::from_code(4), None);
    }

    #[test]
    fn shield_pin_table_is_disjoint() {
        let mut seen = [false; 16];
        for (pwm, in1, in2) in MOTOR_PINS {
            for ch in [pwm, in1, in2] {
                assert!(!seen[ch as usize]);
                seen[ch as usize] = true;
            }
        }
    }
}
