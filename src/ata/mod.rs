// ATA command set carried over SCSI pass-through

pub mod identify;
pub mod passthrough;
pub mod smart;

pub use identify::{IdentifyData, IdentifySummary, IDENTIFY_LEN};
pub use passthrough::{
    ata_status_from_sense, power_mode_result, smart_return_status_result, AtaCommand,
    AtaStatusReport, PowerMode, Protocol, SmartStatus, StatusConfidence,
};
pub use smart::{parse_smart_data, parse_smart_thresholds, SmartAttributeRecord, SmartData};
