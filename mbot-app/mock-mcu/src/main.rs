//! Host-side harness: runs the Motor-Bot driver stack against a simulated
//! I2C register bus, no hardware required.

use clap::Parser;
use core::cell::RefCell;
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, Operation};
use embedded_hal_bus::i2c::RefCellDevice;
use mbot_core::drivers::imu::{self, AxisPlacement, Bno055, CalibrationProfile, EulerAngles, Vector3};
use mbot_core::drivers::motor::MotorShield;
use serde::Serialize;
use tracing::info;

const SHIELD_ADDRESS: u8 = 0x60;

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts {
    /// Emit the sensor readings as JSON on stdout
    #[clap(long)]
    json: bool,
    /// Cruise speed for the motor demo
    #[clap(long, default_value_t = 0.5)]
    speed: f32,
}

/// Transport error of the simulated bus. Never actually produced, but the
/// `I2c` contract wants a concrete error type.
#[derive(Debug)]
struct BusFault;

impl embedded_hal::i2c::Error for BusFault {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Simulated I2C segment with both peripherals' register files behind their
/// real bus addresses.
///
/// The IMU's status register is modeled dynamically: a soft reset or a mode
/// switch makes the chip report "booting" for a couple of polls before it
/// settles into idle or fusion-running, so the driver's poll loops run the
/// same way they do against silicon.
struct FakeBus {
    pca: [u8; 256],
    imu: [u8; 256],
    imu_settle_polls: u8,
}

impl FakeBus {
    fn new() -> Self {
        let mut imu = [0u8; 256];
        // Plausible fused readings: heading 47°, roll -16°, pitch 1°
        imu[0x1A..0x20].copy_from_slice(&[0xF0, 0x02, 0x00, 0xFF, 0x10, 0x00]);
        // Linear acceleration 1.0 / -1.0 / 0.0 m/s²
        imu[0x28..0x2E].copy_from_slice(&[0x64, 0x00, 0x9C, 0xFF, 0x00, 0x00]);
        // Gravity 9.8 m/s² on x
        imu[0x2E..0x34].copy_from_slice(&[0xD4, 0x03, 0x00, 0x00, 0x00, 0x00]);
        // Everything fully calibrated
        imu[0x35] = 0xFF;
        for (i, b) in imu[0x55..0x55 + imu::CALIBRATION_LEN].iter_mut().enumerate() {
            *b = 0xA0 + i as u8;
        }

        Self {
            pca: [0u8; 256],
            imu,
            imu_settle_polls: 0,
        }
    }

    fn handle_write(&mut self, address: u8, bytes: &[u8]) -> usize {
        let reg = bytes[0] as usize;

        if address == imu::DEFAULT_ADDRESS {
            // Reset and mode switches put the chip back into its boot dance
            if reg == 0x3F && bytes.get(1) == Some(&0x20) {
                self.imu_settle_polls = 2;
            }
            if reg == 0x3D && bytes.len() > 1 {
                self.imu_settle_polls = 1;
            }
        }

        let mem = if address == SHIELD_ADDRESS {
            &mut self.pca
        } else {
            &mut self.imu
        };
        for (i, b) in bytes[1..].iter().enumerate() {
            mem[reg + i] = *b;
        }
        reg
    }

    fn handle_read(&mut self, address: u8, reg: usize, buf: &mut [u8]) {
        if address == imu::DEFAULT_ADDRESS && reg == 0x39 {
            buf[0] = if self.imu_settle_polls > 0 {
                self.imu_settle_polls -= 1;
                2
            } else if self.imu[0x3D] & 0x08 != 0 {
                5
            } else {
                0
            };
            return;
        }

        let mem = if address == SHIELD_ADDRESS {
            &self.pca
        } else {
            &self.imu
        };
        buf.copy_from_slice(&mem[reg..reg + buf.len()]);
    }
}

impl ErrorType for FakeBus {
    type Error = BusFault;
}

impl I2c for FakeBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut reg = 0usize;
        for op in operations {
            match op {
                Operation::Write(bytes) => {
                    reg = self.handle_write(address, bytes);
                }
                Operation::Read(buf) => {
                    self.handle_read(address, reg, buf);
                }
            }
        }
        Ok(())
    }
}

/// DelayNs over the host clock.
struct HostDelay;

impl DelayNs for HostDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(std::time::Duration::from_nanos(u64::from(ns)));
    }
}

#[derive(Serialize)]
struct Readings {
    euler: EulerAngles,
    linear_acceleration: Vector3,
    gravity: Vector3,
    calibration: CalibrationProfile,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let opts: Opts = Opts::parse();

    let bus = RefCell::new(FakeBus::new());
    let mut delay = HostDelay;

    // Motor shield bring-up and a short drive script on header 0
    let mut shield = MotorShield::new(&bus, SHIELD_ADDRESS);
    shield.init(&mut delay).unwrap();
    info!("shield at {} Hz", shield.expander().frequency().unwrap());

    let motor = shield.motor(0).unwrap();
    for step in [0.25, opts.speed, 1.0, -opts.speed] {
        motor.set_speed(step).unwrap();
        info!("motor 0 speed {} -> reads {}", step, motor.speed().unwrap());
    }
    motor.set_brake(0.6).unwrap();
    info!("motor 0 braking at {}", motor.brake().unwrap());
    motor.set_speed(0.0).unwrap();

    // IMU bring-up into full fusion and one round of reads
    let mut bno = Bno055::new(RefCellDevice::new(&bus), imu::DEFAULT_ADDRESS);
    bno.init(AxisPlacement::P1, None, &mut delay).unwrap();

    let status = bno.calibration_status().unwrap();
    info!("imu calibration {:?} (full: {})", status, status.is_fully_calibrated());

    let readings = Readings {
        euler: bno.euler().unwrap(),
        linear_acceleration: bno.linear_acceleration().unwrap(),
        gravity: bno.gravity().unwrap(),
        calibration: bno.capture_calibration(&mut delay).unwrap(),
    };

    if opts.json {
        println!("{}", serde_json::to_string(&readings).unwrap());
    } else {
        info!("euler {:?}", readings.euler);
        info!("linear acceleration {:?}", readings.linear_acceleration);
        info!("gravity {:?}", readings.gravity);
    }
}
