//! A stopwatch shared by every terminal that looks at it. Each process derives the shown time
//! from one persisted snapshot and the wall clock, follows the changes other processes make, and
//! reports the time into tasks, a session history and a daily goal. Once per calendar day the
//! running totals are archived and everything starts over.
//!

pub mod cli;
pub mod config;
pub mod error;
pub mod rollover;
pub mod stopwatch;
pub mod store;
pub mod tracker;
pub mod utils;
