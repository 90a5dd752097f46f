//! Core I2C register drivers for the Motor-Bot on no-std embedded platforms.
//!
//! For a runnable host-side demo, see the `mock-mcu` application.
#![no_std]

pub mod drivers;
