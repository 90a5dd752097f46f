//! 9-DOF absolute-orientation IMU driver (BNO055-class).
//!
//! The device runs an on-chip sensor-fusion firmware behind a mode register.
//! Bring-up is a small blocking state machine: soft reset, poll the system
//! status until the chip reports idle, configure axis mapping (and optionally
//! restore a saved calibration profile) while still in config mode, then
//! switch into a fusion mode and poll until fusion is running. All waits go
//! through an injected [`DelayNs`].

use embedded_hal::{delay::DelayNs, i2c::I2c};
use serde::{Deserialize, Serialize};

use super::{bus::RegDevice, Error};

const AXIS_MAP_CONFIG: u8 = 0x41;
const AXIS_MAP_SIGN: u8 = 0x42;

const OP_MODE: u8 = 0x3D;

const SYS_STATUS: u8 = 0x39;
const SYS_STATUS_IDLE: u8 = 0;
const SYS_STATUS_ERROR: u8 = 1;
const SYS_STATUS_FUSION_RUNNING: u8 = 5;

const SYS_TRIGGER: u8 = 0x3F;
const SYS_TRIGGER_RST_SYS: u8 = 1 << 5;

const CALIB_STAT: u8 = 0x35;
const CALIB_DATA_START: u8 = 0x55;

const EUL_ORIENT_START: u8 = 0x1A;
const LIN_ACCEL_START: u8 = 0x28;
const GRAVITY_START: u8 = 0x2E;
const VECTOR_LEN: usize = 6;

/// Interval between system-status polls during bring-up.
const STATUS_POLL_MS: u32 = 5;

/// Settle time after every operating-mode switch; the device reboots its
/// fusion subsystem internally.
const MODE_SETTLE_MS: u32 = 19;

/// Default bound on each status poll loop (~2 s at the 5 ms interval).
const DEFAULT_POLL_LIMIT: u32 = 400;

/// Size of the calibration offset block.
pub const CALIBRATION_LEN: usize = 21;

/// Factory-default bus address.
pub const DEFAULT_ADDRESS: u8 = 0x28;

/// Operating modes. Only one is active at a time; every switch requires a
/// settle delay before further register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Mode {
    Config = 0b0000,
    AccOnly = 0b0001,
    MagOnly = 0b0010,
    GyroOnly = 0b0011,
    AccMag = 0b0100,
    AccGyro = 0b0101,
    MagGyro = 0b0110,
    Amg = 0b0111,
    Imu = 0b1000,
    Compass = 0b1001,
    M4g = 0b1010,
    NdofFmcOff = 0b1011,
    /// Full 9-DOF fusion.
    Ndof = 0b1100,
}

impl Mode {
    /// Whether the fusion firmware is active in this mode.
    pub fn is_fusion(self) -> bool {
        matches!(
            self,
            Self::Imu | Self::Compass | Self::M4g | Self::NdofFmcOff | Self::Ndof
        )
    }

    fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0x0F {
            0b0000 => Some(Self::Config),
            0b0001 => Some(Self::AccOnly),
            0b0010 => Some(Self::MagOnly),
            0b0011 => Some(Self::GyroOnly),
            0b0100 => Some(Self::AccMag),
            0b0101 => Some(Self::AccGyro),
            0b0110 => Some(Self::MagGyro),
            0b0111 => Some(Self::Amg),
            0b1000 => Some(Self::Imu),
            0b1001 => Some(Self::Compass),
            0b1010 => Some(Self::M4g),
            0b1011 => Some(Self::NdofFmcOff),
            0b1100 => Some(Self::Ndof),
            _ => None,
        }
    }
}

/// The 8 canonical mounting orientations.
///
/// Each value packs the placement register in the high bits and the sign
/// register in the low three; [`Bno055::set_axis_placement`] splits it across
/// AXIS_MAP_CONFIG / AXIS_MAP_SIGN. Must be applied before entering a fusion
/// mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum AxisPlacement {
    P0 = (0x21 << 3) | 0x04,
    P1 = (0x24 << 3) | 0x00,
    P2 = (0x24 << 3) | 0x06,
    P3 = (0x21 << 3) | 0x02,
    P4 = (0x24 << 3) | 0x03,
    P5 = (0x21 << 3) | 0x01,
    P6 = (0x21 << 3) | 0x07,
    P7 = (0x24 << 3) | 0x05,
}

impl AxisPlacement {
    /// Value for the AXIS_MAP_CONFIG register.
    pub fn config(self) -> u8 {
        (self as u16 >> 3) as u8
    }

    /// Value for the AXIS_MAP_SIGN register.
    pub fn sign(self) -> u8 {
        (self as u16 & 0b111) as u8
    }
}

impl Default for AxisPlacement {
    fn default() -> Self {
        Self::P1
    }
}

/// Fused orientation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EulerAngles {
    pub heading: f32,
    pub roll: f32,
    pub pitch: f32,
}

/// Cartesian triple in m/s².
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Per-subsystem calibration levels, each 0 (uncalibrated) to 3 (full).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationStatus {
    pub sys: u8,
    pub gyr: u8,
    pub acc: u8,
    pub mag: u8,
}

impl CalibrationStatus {
    const FULL: u8 = 3;

    fn from_byte(byte: u8) -> Self {
        Self {
            sys: (byte >> 6) & 0b11,
            gyr: (byte >> 4) & 0b11,
            acc: (byte >> 2) & 0b11,
            mag: byte & 0b11,
        }
    }

    /// All four subsystems report level 3.
    pub fn is_fully_calibrated(&self) -> bool {
        self.sys == Self::FULL
            && self.gyr == Self::FULL
            && self.acc == Self::FULL
            && self.mag == Self::FULL
    }
}

/// Opaque fusion calibration offsets.
///
/// Captured while a fusion mode is running, restored while the device is in
/// config mode; inert data otherwise, so applications can persist it across
/// power cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationProfile(pub [u8; CALIBRATION_LEN]);

impl CalibrationProfile {
    pub fn as_bytes(&self) -> &[u8; CALIBRATION_LEN] {
        &self.0
    }
}

/// BNO055-class absolute-orientation sensor.
pub struct Bno055<I2C> {
    dev: RegDevice<I2C>,
    mode: Mode,
    poll_limit: u32,
}

impl<I2C, E> Bno055<I2C>
where
    I2C: I2c<Error = E>,
{
    /// Side-effect-free constructor; nothing touches the bus until
    /// [`init`](Self::init).
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self {
            dev: RegDevice::new(i2c, address),
            mode: Mode::Config,
            poll_limit: DEFAULT_POLL_LIMIT,
        }
    }

    /// Bound on each bring-up status poll loop. Default 400 (~2 s).
    pub fn set_poll_limit(&mut self, limit: u32) {
        self.poll_limit = limit;
    }

    /// Returns the underlying bus handle, consuming the driver.
    pub fn release(self) -> I2C {
        self.dev.release()
    }

    /// Trigger a soft reset. The register map returns to defaults; the
    /// device needs a full [`init`](Self::init) afterwards.
    pub fn reset(&mut self) -> Result<(), Error<E>> {
        self.dev.write_reg(SYS_TRIGGER, SYS_TRIGGER_RST_SYS)?;
        self.mode = Mode::Config;
        Ok(())
    }

    /// Soft-reset the device on the way down.
    pub fn deinit(&mut self) -> Result<(), Error<E>> {
        self.reset()
    }

    /// Blocking bring-up into full 9-DOF fusion.
    ///
    /// Soft reset, wait for the chip to go idle, restore `calibration` (must
    /// be exactly [`CALIBRATION_LEN`] bytes) while still in config mode,
    /// apply the axis mapping, enter NDOF and wait for fusion to run. An
    /// error status at any point is fatal ([`Error::System`]); worst-case
    /// blocking time is bounded by the poll limit.
    pub fn init(
        &mut self,
        axes: AxisPlacement,
        calibration: Option<&[u8]>,
        delay: &mut impl DelayNs,
    ) -> Result<(), Error<E>> {
        if let Some(blob) = calibration {
            if blob.len() != CALIBRATION_LEN {
                return Err(Error::InvalidCalibration(blob.len()));
            }
        }

        self.reset()?;
        self.wait_for_status(SYS_STATUS_IDLE, delay)?;
        tracing::info!("imu idle after reset");

        if let Some(blob) = calibration {
            self.dev.write_block(CALIB_DATA_START, blob)?;
            tracing::info!("calibration profile restored");
        }

        self.set_axis_placement(axes)?;
        self.set_mode(Mode::Ndof, delay)?;
        self.wait_for_status(SYS_STATUS_FUSION_RUNNING, delay)?;
        tracing::info!("imu fusion running");
        Ok(())
    }

    /// Poll SYS_STATUS at the 5 ms interval until `wanted` comes back.
    ///
    /// An error status is fatal and surfaces immediately. A failed read
    /// counts as "status unknown" and polling continues; transient NACKs are
    /// normal while the device reboots.
    fn wait_for_status(&mut self, wanted: u8, delay: &mut impl DelayNs) -> Result<(), Error<E>> {
        for _ in 0..self.poll_limit {
            match self.dev.read_reg(SYS_STATUS) {
                Ok(status) if status == wanted => return Ok(()),
                Ok(SYS_STATUS_ERROR) => return Err(Error::System),
                Ok(status) => {
                    tracing::trace!("sys status {} while waiting for {}", status, wanted);
                }
                Err(_) => {
                    tracing::trace!("status read failed while waiting for {}", wanted);
                }
            }
            delay.delay_ms(STATUS_POLL_MS);
        }
        tracing::warn!("gave up waiting for sys status {}", wanted);
        Err(Error::StatusTimeout)
    }

    /// Switch the operating mode and wait out the device-internal reboot.
    pub fn set_mode(&mut self, mode: Mode, delay: &mut impl DelayNs) -> Result<(), Error<E>> {
        self.dev.write_reg(OP_MODE, mode as u8)?;
        self.mode = mode;
        delay.delay_ms(MODE_SETTLE_MS);
        Ok(())
    }

    /// Read the live operating mode from the device.
    pub fn mode(&mut self) -> Result<Mode, Error<E>> {
        let bits = self.dev.read_reg(OP_MODE)?;
        Mode::from_bits(bits).ok_or(Error::InvalidMode(bits))
    }

    /// Split an [`AxisPlacement`] across the two axis-map registers. Only
    /// effective while in config mode, before fusion starts.
    pub fn set_axis_placement(&mut self, axes: AxisPlacement) -> Result<(), Error<E>> {
        self.dev.write_reg(AXIS_MAP_CONFIG, axes.config())?;
        self.dev.write_reg(AXIS_MAP_SIGN, axes.sign())
    }

    fn read_vector(&mut self, start: u8) -> Result<[i16; 3], Error<E>> {
        let mut buf = [0u8; VECTOR_LEN];
        self.dev.read_block_into(start, &mut buf)?;
        Ok([
            i16::from_le_bytes([buf[0], buf[1]]),
            i16::from_le_bytes([buf[2], buf[3]]),
            i16::from_le_bytes([buf[4], buf[5]]),
        ])
    }

    /// Fused orientation in degrees (1/16 ° per LSB).
    pub fn euler(&mut self) -> Result<EulerAngles, Error<E>> {
        let [heading, roll, pitch] = self.read_vector(EUL_ORIENT_START)?;
        Ok(EulerAngles {
            heading: heading as f32 / 16.0,
            roll: roll as f32 / 16.0,
            pitch: pitch as f32 / 16.0,
        })
    }

    /// Acceleration with gravity removed, m/s² (1/100 per LSB).
    pub fn linear_acceleration(&mut self) -> Result<Vector3, Error<E>> {
        let [x, y, z] = self.read_vector(LIN_ACCEL_START)?;
        Ok(Vector3 {
            x: x as f32 / 100.0,
            y: y as f32 / 100.0,
            z: z as f32 / 100.0,
        })
    }

    /// Gravity vector, m/s² (1/100 per LSB).
    pub fn gravity(&mut self) -> Result<Vector3, Error<E>> {
        let [x, y, z] = self.read_vector(GRAVITY_START)?;
        Ok(Vector3 {
            x: x as f32 / 100.0,
            y: y as f32 / 100.0,
            z: z as f32 / 100.0,
        })
    }

    /// Unpack the four 2-bit calibration-level fields.
    pub fn calibration_status(&mut self) -> Result<CalibrationStatus, Error<E>> {
        let byte = self.dev.read_reg(CALIB_STAT)?;
        Ok(CalibrationStatus::from_byte(byte))
    }

    /// Capture the calibration block: freeze fusion by dropping into config
    /// mode, read the offsets, then return to the mode that was running.
    /// The only operation that round-trips the mode register as a side
    /// effect.
    pub fn capture_calibration(
        &mut self,
        delay: &mut impl DelayNs,
    ) -> Result<CalibrationProfile, Error<E>> {
        let restore = self.mode;
        self.set_mode(Mode::Config, delay)?;

        let mut blob = [0u8; CALIBRATION_LEN];
        self.dev.read_block_into(CALIB_DATA_START, &mut blob)?;

        self.set_mode(restore, delay)?;
        Ok(CalibrationProfile(blob))
    }

    /// Write a previously captured profile to the device. Only effective
    /// while in config mode.
    pub fn restore_calibration(&mut self, profile: &CalibrationProfile) -> Result<(), Error<E>> {
        self.dev.write_block(CALIB_DATA_START, profile.as_bytes())
    }
}
