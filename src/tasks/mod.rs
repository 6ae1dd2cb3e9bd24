//! Background Tasks Module
//!
//! Contains background tasks owned by a cache instance.
//!
//! # Tasks
//! - Expiration: removes entries once their deadline passes, as a tokio task
//!   or, outside any runtime, on a dedicated thread

mod driver;
mod expiration;
mod timer_thread;

pub(crate) use driver::ExpirationDriver;
