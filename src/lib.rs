//! Local-first time tracker for people who work on several devices. Devices never talk to each
//! other, they share a folder (usually inside a cloud sync folder) and exchange state only by
//! reading and writing json files in it.
//!

pub mod cli;
pub mod fs;
pub mod storage;
pub mod tracker;
pub mod utils;
