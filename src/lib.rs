//! aerostream - pull-based streaming query execution for aerodb
//!
//! Index range scans, table scans, FIRST/SKIP limits, conditional
//! branches and procedure streams behind one record stream contract.

pub mod config;
pub mod executor;
pub mod expr;
pub mod index;
pub mod observability;
pub mod page;
pub mod storage;
