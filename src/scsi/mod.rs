// SCSI command building and response decoding

pub mod cdb;
pub mod codec;
pub mod pages;
pub mod parse;
pub mod sense;

pub use cdb::{CommandBlock, DataDirection, TransferFlags};
pub use parse::{parse_capacity_10, parse_capacity_16, parse_inquiry, Capacity10, Capacity16, InquiryData};
pub use sense::{parse_sense, AtaStatus, SenseFormat, SenseInfo, SenseKey, SenseKeySpecific};

#[cfg(test)]
mod sense_tests;
