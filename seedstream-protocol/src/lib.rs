//! SeedLink wire protocol primitives.
//!
//! This crate provides the protocol layer shared by the connection engine
//! and the command-line tool: command encoding, SeedLink frame-header
//! classification, miniSEED 2.x/3.x record boundary detection, sequence
//! numbers, selectors, and server response parsing.

pub mod command;
pub mod error;
pub mod frame;
pub mod info;
pub mod mseed;
pub mod response;
pub mod selector;
pub mod sequence;

pub use command::Command;
pub use error::{ProtocolError, Result};
pub use frame::FrameHeader;
pub use info::InfoLevel;
pub use mseed::{RecordCheck, RecordKind, RecordSummary, RecordTime};
pub use response::Response;
pub use selector::{Selector, SelectorList, glob_match};
pub use sequence::SequenceNumber;
