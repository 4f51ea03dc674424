//! Zwetschge Core - device data model and consistency validation
//!
//! This crate provides the in-memory description of a time-of-flight imager
//! device as stored in a Zwetschge container:
//! - The device-level data (product identification, register maps)
//! - Per-use-case configuration (frame rates, exposure groups, register work)
//! - A pure consistency validator that flags mistakes which would otherwise
//!   only surface as confusing behavior on real hardware
//!
//! The binary container codec lives in the `zwetschge-format` crate.

pub mod device;
pub mod use_case;
pub mod validator;

pub use device::{DeviceData, TableOfRegisterMaps, TimedRegEntry};
pub use use_case::{
    AccessLevel, ExposureGroup, InvalidAccessLevel, RawFrameSet, RegisterAction,
    SequentialRegisterBlock, UseCase,
};
pub use validator::{validate, Finding, Severity};
