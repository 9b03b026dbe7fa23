//! SQL query implementations, one module per table group.
//!
//! Every function runs inside the caller's transaction.

pub mod livestreams;
pub mod reservations;
pub mod users;
