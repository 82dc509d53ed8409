//! Testing utilities - synthetic frames for offline testing without hardware.

pub mod synthetic_data;
