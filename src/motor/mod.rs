// Motor control for the two-channel drive board
//
// Provides:
// - Power <-> PWM encoding (direction + 0..255 magnitude)
// - High-level controller API over the framed transport

mod controller;

pub use controller::{Direction, Motor, MotorController, MotorError, MotorReading};
