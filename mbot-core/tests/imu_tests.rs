use embedded_hal::i2c::ErrorKind;
use embedded_hal_mock::eh1::delay::NoopDelay;
use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTrans};
use mbot_core::drivers::{
    imu::{AxisPlacement, Bno055, CalibrationStatus, Mode, CALIBRATION_LEN, DEFAULT_ADDRESS},
    Error,
};

fn write(data: Vec<u8>) -> I2cTrans {
    I2cTrans::write(DEFAULT_ADDRESS, data)
}

fn write_read(write: Vec<u8>, read: Vec<u8>) -> I2cTrans {
    I2cTrans::write_read(DEFAULT_ADDRESS, write, read)
}

/// Soft reset followed by a status poll returning `status`.
fn reset_then_status(status: u8) -> Vec<I2cTrans> {
    vec![write(vec![0x3F, 0x20]), write_read(vec![0x39], vec![status])]
}

fn finish(imu: Bno055<I2cMock>) {
    let mut mock = imu.release();
    mock.done();
}

#[test]
fn init_completes_through_the_status_sequence() {
    let expectations = [
        write(vec![0x3F, 0x20]),
        // two not-yet-idle polls, then idle
        write_read(vec![0x39], vec![2]),
        write_read(vec![0x39], vec![2]),
        write_read(vec![0x39], vec![0]),
        // axis map P1 split across config/sign
        write(vec![0x41, 0x24]),
        write(vec![0x42, 0x00]),
        // NDOF fusion
        write(vec![0x3D, 0x0C]),
        write_read(vec![0x39], vec![2]),
        write_read(vec![0x39], vec![5]),
        // mode register reads back the fusion mode
        write_read(vec![0x3D], vec![0x0C]),
    ];

    let mut imu = Bno055::new(I2cMock::new(&expectations), DEFAULT_ADDRESS);
    imu.init(AxisPlacement::P1, None, &mut NoopDelay).unwrap();
    assert_eq!(imu.mode(), Ok(Mode::Ndof));
    finish(imu);
}

#[test]
fn init_restores_a_calibration_profile_while_idle() {
    let blob: Vec<u8> = (1..=CALIBRATION_LEN as u8).collect();

    let mut expectations = reset_then_status(0);
    let mut calib_write = vec![0x55];
    calib_write.extend(&blob);
    expectations.extend([
        write(calib_write),
        write(vec![0x41, 0x24]),
        write(vec![0x42, 0x00]),
        write(vec![0x3D, 0x0C]),
        write_read(vec![0x39], vec![5]),
    ]);

    let mut imu = Bno055::new(I2cMock::new(&expectations), DEFAULT_ADDRESS);
    imu.init(AxisPlacement::P1, Some(&blob[..]), &mut NoopDelay)
        .unwrap();
    finish(imu);
}

#[test]
fn wrong_length_blob_fails_before_the_bus() {
    let mut imu = Bno055::new(I2cMock::new(&[]), DEFAULT_ADDRESS);

    let short = [0u8; 20];
    assert_eq!(
        imu.init(AxisPlacement::P1, Some(&short[..]), &mut NoopDelay),
        Err(Error::InvalidCalibration(20))
    );
    finish(imu);
}

#[test]
fn error_status_is_fatal_immediately() {
    let expectations = reset_then_status(1);

    let mut imu = Bno055::new(I2cMock::new(&expectations), DEFAULT_ADDRESS);
    assert_eq!(
        imu.init(AxisPlacement::P1, None, &mut NoopDelay),
        Err(Error::System)
    );
    finish(imu);
}

#[test]
fn error_status_while_waiting_for_fusion_is_fatal() {
    let mut expectations = reset_then_status(0);
    expectations.extend([
        write(vec![0x41, 0x24]),
        write(vec![0x42, 0x00]),
        write(vec![0x3D, 0x0C]),
        write_read(vec![0x39], vec![1]),
    ]);

    let mut imu = Bno055::new(I2cMock::new(&expectations), DEFAULT_ADDRESS);
    assert_eq!(
        imu.init(AxisPlacement::P1, None, &mut NoopDelay),
        Err(Error::System)
    );
    finish(imu);
}

#[test]
fn bus_glitches_during_polling_are_tolerated() {
    let expectations = [
        write(vec![0x3F, 0x20]),
        // transient NACK while the device reboots
        write_read(vec![0x39], vec![0]).with_error(ErrorKind::Other),
        write_read(vec![0x39], vec![0]),
        write(vec![0x41, 0x24]),
        write(vec![0x42, 0x00]),
        write(vec![0x3D, 0x0C]),
        write_read(vec![0x39], vec![5]),
    ];

    let mut imu = Bno055::new(I2cMock::new(&expectations), DEFAULT_ADDRESS);
    imu.init(AxisPlacement::P1, None, &mut NoopDelay).unwrap();
    finish(imu);
}

#[test]
fn poll_limit_bounds_bring_up() {
    let expectations = [
        write(vec![0x3F, 0x20]),
        write_read(vec![0x39], vec![2]),
        write_read(vec![0x39], vec![2]),
        write_read(vec![0x39], vec![2]),
    ];

    let mut imu = Bno055::new(I2cMock::new(&expectations), DEFAULT_ADDRESS);
    imu.set_poll_limit(3);
    assert_eq!(
        imu.init(AxisPlacement::P1, None, &mut NoopDelay),
        Err(Error::StatusTimeout)
    );
    finish(imu);
}

#[test]
fn vector_reads_scale_the_raw_triples() {
    let expectations = [
        // heading 752, roll -256, pitch 16 (1/16 degree per LSB)
        write_read(vec![0x1A], vec![0xF0, 0x02, 0x00, 0xFF, 0x10, 0x00]),
        // 100, -100, 0 (1/100 m/s^2 per LSB)
        write_read(vec![0x28], vec![0x64, 0x00, 0x9C, 0xFF, 0x00, 0x00]),
        // 980, 0, 10
        write_read(vec![0x2E], vec![0xD4, 0x03, 0x00, 0x00, 0x0A, 0x00]),
    ];

    let mut imu = Bno055::new(I2cMock::new(&expectations), DEFAULT_ADDRESS);

    let euler = imu.euler().unwrap();
    assert_eq!(euler.heading, 47.0);
    assert_eq!(euler.roll, -16.0);
    assert_eq!(euler.pitch, 1.0);

    let lia = imu.linear_acceleration().unwrap();
    assert_eq!(lia.x, 1.0);
    assert_eq!(lia.y, -1.0);
    assert_eq!(lia.z, 0.0);

    let grv = imu.gravity().unwrap();
    assert_eq!(grv.x, 9.8);
    assert_eq!(grv.y, 0.0);
    assert_eq!(grv.z, 0.1);
    finish(imu);
}

#[test]
fn calibration_status_unpacks_the_four_fields() {
    let expectations = [
        write_read(vec![0x35], vec![0b1110_0100]),
        write_read(vec![0x35], vec![0xFF]),
    ];

    let mut imu = Bno055::new(I2cMock::new(&expectations), DEFAULT_ADDRESS);

    let status = imu.calibration_status().unwrap();
    assert_eq!(
        status,
        CalibrationStatus {
            sys: 3,
            gyr: 2,
            acc: 1,
            mag: 0
        }
    );
    assert!(!status.is_fully_calibrated());

    assert!(imu.calibration_status().unwrap().is_fully_calibrated());
    finish(imu);
}

#[test]
fn capture_round_trips_through_config_mode() {
    let blob: Vec<u8> = (100..100 + CALIBRATION_LEN as u8).collect();

    let expectations = [
        write(vec![0x3D, 0x0C]),
        // capture: drop to config, read the block, restore the fusion mode
        write(vec![0x3D, 0x00]),
        write_read(vec![0x55], blob.clone()),
        write(vec![0x3D, 0x0C]),
    ];

    let mut imu = Bno055::new(I2cMock::new(&expectations), DEFAULT_ADDRESS);
    imu.set_mode(Mode::Ndof, &mut NoopDelay).unwrap();

    let profile = imu.capture_calibration(&mut NoopDelay).unwrap();
    assert_eq!(profile.as_bytes().len(), CALIBRATION_LEN);
    assert_eq!(&profile.as_bytes()[..], &blob[..]);
    finish(imu);
}
