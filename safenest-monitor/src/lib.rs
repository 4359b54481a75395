//! Fall detection monitor.
//!
//! Consumes a push stream of accelerometer samples, classifies high-impact
//! events, opens a bounded "are you okay?" check-in window and escalates to
//! an emergency alert when nobody acknowledges it in time.
//!
//! The pieces, leaf first:
//!
//! - [`sensor`]: samples, sampling rates and accelerometer sources.
//! - [`detector`]: threshold classifier with cooldown suppression.
//! - [`timer`]: single-shot cancellable escalation timers.
//! - [`machine`]: the detect / check-in / escalate state machine.
//! - [`session`]: the actor that serializes samples, timer fires and
//!   commands onto one execution context.
//!
//! Notifications and app-layer events leave the core through [`alert`] and
//! [`app_event`]; the core never reaches into global state.
//!
//! Around the core, [`keep_alive`] holds a wake lock while monitoring,
//! [`prefs`] remembers whether monitoring was enabled, and [`api`] exposes
//! the session over HTTP for [`api_client`] and the CLI.

pub mod alert;
pub mod api;
pub mod api_client;
pub mod app_event;
pub mod config;
pub mod detector;
pub mod error;
pub mod keep_alive;
pub mod machine;
pub mod prefs;
pub mod sensor;
pub mod session;
pub mod timer;
pub mod tracing;
