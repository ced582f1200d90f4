//! LZTS-DAQ: readout tools for the LZTS slow/fast ADC digitizer
//!
//! This crate decodes the digitizer's POD frames, sorts them into per-channel
//! slots for a rate-limited waveform display, surveys recorded data files
//! for integrity problems and calibrates the slow-ADC lane delays.

pub mod calibration;
pub mod common;
pub mod config;
pub mod data_source_emulator;
pub mod decoder;
pub mod recorder;
pub mod survey;
pub mod viewer;
