#![cfg_attr(not(test), no_std)]

// Shared logic for the ground-bond test engine.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library. Peripherals are reached through the traits in
// `hardware`, so the same phase-control, sampling and session code runs on the
// STM32 target, inside the emulator, and under host unit tests.

pub mod display;
pub mod fixed_point;
pub mod hardware;
pub mod measurement;
pub mod phase;
pub mod sampling;
pub mod session;
