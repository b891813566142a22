//! DMX512 (ANSI E1.11) framing engine and DMX-RDM (ANSI E1.20) protocol stack for half-duplex
//! RS485 transports. The crate is no-std and no-alloc (no heap allocation); all storage is sized
//! at compile time.
//!
//! Please refer to the [official specifications](https://tsp.esta.org/) published by the ESTA.
//!
//! The stack is split into layers:
//!
//! * [dmx_uart_driver] defines the capabilities a platform has to provide: a non-blocking byte
//!   transport that reports [dmx_uart_driver::DmxEvent]s, a microsecond [dmx_uart_driver::Clock]
//!   and a [dmx_uart_driver::KvStore] for persisted parameters.
//! * [dmx_engine] is the interrupt-context state machine that turns transport events into frames.
//! * [dmx_driver] wraps the engine in a [dmx_driver::DmxPort] that can be shared between an
//!   interrupt handler and tasks.
//! * [rdm_data] and [rdm_format] encode and decode RDM packets and parameter data.
//! * [parameter] and [rdm_responder] implement the responder side, [dmx_receiver] drives it.
//! * [dmx_controller] and [discovery] implement the controller side.
//! * [registry] owns installed ports.
//!
//! # Usage
//!
//! ## Controller
//!
//! ```rust,ignore
//! use dmx_rdm_engine::discovery::run_full_discovery;
//! use dmx_rdm_engine::dmx_controller::{DmxController, DmxControllerConfig};
//! use dmx_rdm_engine::dmx_driver::{DmxConfig, DmxPort};
//! use dmx_rdm_engine::unique_identifier::{PackageAddress, UniqueIdentifier};
//!
//! let port: DmxPort<_, _> = DmxPort::new(uart, clock, DmxConfig::default()).unwrap();
//! let mut controller = DmxController::new(&port, &DmxControllerConfig::default());
//!
//! controller.rdm_disc_un_mute(PackageAddress::Broadcast).unwrap();
//!
//! let mut uid_array = [UniqueIdentifier::new(1, 1).unwrap(); 32];
//! let amount_found = run_full_discovery(&mut controller, &mut uid_array).unwrap();
//!
//! for device in &uid_array[..amount_found] {
//!     controller.rdm_set_identify(PackageAddress::Device(*device), true).unwrap();
//! }
//! ```
//!
//! ## Responder
//!
//! ```rust,ignore
//! use dmx_rdm_engine::dmx_driver::{DmxConfig, DmxPort};
//! use dmx_rdm_engine::dmx_receiver::{DmxReceiver, DmxResponderHandler};
//! use dmx_rdm_engine::rdm_responder::{RdmResponder, RdmResponderConfig};
//!
//! struct Fixture;
//! impl DmxResponderHandler for Fixture {
//!     type Error = core::convert::Infallible;
//! }
//!
//! let port: DmxPort<_, _> = DmxPort::new(uart, clock, DmxConfig::default()).unwrap();
//! let responder = RdmResponder::<24, 4, 48>::new(RdmResponderConfig::default()).unwrap();
//! let mut receiver = DmxReceiver::new(&port, responder);
//!
//! loop {
//!     let _ = receiver.poll(&mut Fixture);
//! }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
mod fmt;

pub mod command_class;
pub mod consts;
/// Recursive uid discovery on top of a controller.
pub mod discovery;
/// Module for building dmx-rdm controllers.
pub mod dmx_controller;
/// Task facing port that owns a [dmx_engine::FrameEngine] and a transport.
pub mod dmx_driver;
/// Interrupt context frame engine.
pub mod dmx_engine;
/// Module for building dmx-rdm receivers.
pub mod dmx_receiver;
/// Capabilities a platform has to provide.
pub mod dmx_uart_driver;
mod layouts;
/// Parameter definitions and the per device parameter store.
pub mod parameter;
pub mod pids;
pub mod rdm_data;
/// Parameter data format strings.
pub mod rdm_format;
pub mod rdm_packages;
/// Parser and dispatcher for rdm requests without an underlying driver.
/// Mainly for highly interrupt driven applications.
pub mod rdm_responder;
pub mod rdm_types;
pub mod registry;
pub mod types;
pub mod unique_identifier;
pub mod utils;
