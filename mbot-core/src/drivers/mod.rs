//! I2C driver stack for the Motor-Bot's peripherals.
//!
//! This module exports the layered drivers the rest of the firmware builds
//! on:
//!
//! - `bus`: register-addressed device plumbing shared by every driver
//! - `expander`: 16-channel PWM/GPIO expander (PCA9685-class)
//! - `motor`: H-bridge DC motors composed from expander channels
//! - `imu`: 9-DOF absolute-orientation sensor (BNO055-class)
//!
//! All drivers are synchronous and blocking; waits go through an injected
//! [`embedded_hal::delay::DelayNs`] so host tests can run without sleeping.

pub mod bus;
pub mod expander;
pub mod imu;
pub mod motor;

pub use bus::RegDevice;
pub use expander::{Pca9685, PinChannel, PwmChannel};
pub use imu::{AxisPlacement, Bno055, CalibrationProfile};
pub use motor::{Direction, DirectionalMotor, Motor, MotorShield};

/// What a channel slot on the expander was registered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// 12-bit PWM output.
    Pwm,
    /// Binary fully-on/fully-off output.
    Pin,
}

/// Errors that can occur when interacting with the driver stack.
///
/// `E` is the transport error of the underlying `embedded_hal::i2c::I2c`
/// implementation. `System` is fatal and never retried; bus errors are only
/// absorbed inside the IMU status poll loops.
#[derive(Debug, PartialEq)]
pub enum Error<E> {
    /// Transport-level failure (NACK, timeout), propagated unchanged.
    Bus(E),
    /// Expander channel index outside `0..=15`.
    InvalidChannel(u8),
    /// The channel is already registered with a different kind.
    ChannelTypeMismatch {
        channel: u8,
        registered: ChannelKind,
        requested: ChannelKind,
    },
    /// Duty value outside the accepted range for the channel's mode.
    InvalidDuty(u16),
    /// Motor speed or brake input out of range.
    InvalidSpeed,
    /// Direction code outside `0..=3`.
    InvalidDirection(u8),
    /// Shield motor index outside `0..=3`.
    InvalidMotor(u8),
    /// Computed prescale outside the device's `[3, 255]` window.
    InvalidPrescale(i32),
    /// The live prescale register no longer matches the cached value.
    PrescaleChanged { cached: u8, device: u8 },
    /// The IMU reported a hardware error status. Unrecoverable without an
    /// external reset.
    System,
    /// A bounded status poll loop ran out of attempts.
    StatusTimeout,
    /// OP_MODE read back an encoding this driver does not know.
    InvalidMode(u8),
    /// Calibration blob length differs from the device's fixed block size.
    InvalidCalibration(usize),
}
