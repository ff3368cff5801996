//! Outbox Core — shared abstractions for the transactional outbox.
//!
//! This crate defines the event model, the wire envelope and the contracts
//! (store, publisher, notification) that the relay is written against. It
//! contains no infrastructure code.

pub mod clock;
pub mod envelope;
pub mod error;
pub mod event;
pub mod notification;
pub mod publisher;
pub mod store;
