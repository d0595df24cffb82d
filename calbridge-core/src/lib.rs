//! Core of calbridge: keeps calendars hosted in different domains converged.
//!
//! This crate provides:
//! - `Event` and related types for calendar events
//! - `ReplicaStore`, one calendar's cache, cursor and write batch
//! - `resolve`, the conflict rule picking the canonical copy of an event
//! - `SyncedCalendar`, the loop that pulls, resolves and pushes until replicas agree
//! - `remote` module for the calbridge-provider communication protocol

pub mod backend;
pub mod config;
pub mod error;
pub mod event;
pub mod memory;
pub mod remote;
pub mod replica;
pub mod resolve;
pub mod synced_calendar;

pub use backend::{AccessRole, CalendarBackend, CalendarInfo, EventPage, ListRequest, WriteOp};
pub use error::{BackendError, BridgeError, BridgeResult, ErrorKind};
pub use event::*;
pub use replica::ReplicaStore;
pub use resolve::resolve;
pub use synced_calendar::SyncedCalendar;
