//! IIoT sensor agent library.
//!
//! Bridges a DHT22 climate sensor, a switch input and an LED output to an
//! MQTT broker. The binary wires these pieces together; the library keeps
//! them testable without hardware or a broker.

pub mod command;
pub mod config;
pub mod control;
pub mod error;
pub mod hardware;
pub mod mqtt;
