//!  Storage is organized around a [folder::SharedFolder] chosen by the user.
//!  The basic idea is:
//!   - Devices never talk to each other, they only read and write files in that folder.
//!   - Entries live in a single json array that is always overwritten as a whole.
//!   - Timesheet archives are named after their period, so they're written at most once.
//!   - Nothing here knows about the running timer, that is decided in [crate::tracker].

pub mod archive;
pub mod config;
pub mod device_lock;
pub mod entities;
pub mod entry_storage;
pub mod error;
pub mod folder;
