//! shotforge job subsystem.
//!
//! Durable queues, leasing workers, the campaign/cleanup/notification/renewal
//! processors, recurring schedules and the process supervisor.

pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod notification;
pub mod processors;
pub mod queue;
pub mod scheduler;
pub mod services;
pub mod supervisor;
pub mod utils;
pub mod worker;

pub use error::{Error, Result};
