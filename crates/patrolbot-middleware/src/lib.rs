//! `patrolbot-middleware` – transport plumbing for the bridge.
//!
//! Moves bytes between the robot, the bridge core, and the operators without
//! caring about their meaning.
//!
//! # Modules
//!
//! - [`adapter`] – the [`PubSubAdapter`] and [`BroadcastAdapter`] seams the
//!   core is written against.
//! - [`mqtt_adapter`] – `rumqttc`-backed robot link with its own
//!   connect/reconnect/disconnect lifecycle.
//! - [`hub`] – in-process operator session registry with destination-based
//!   fan-out.

pub mod adapter;
pub mod hub;
pub mod mqtt_adapter;

pub use adapter::{BroadcastAdapter, DeliveryGuarantee, InboundMessage, PubSubAdapter};
pub use hub::{Delivery, SessionHub, SessionId};
pub use mqtt_adapter::{InboundStream, MqttAdapter, MqttLinkConfig};
