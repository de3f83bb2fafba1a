// Device-facing collaborators of the scan engine
//
// Organized structure:
// - identify.rs: capacity discovery and device identity
// - monitor.rs: SMART / informational exception polling between strides
// - mounts.rs: mount-state query
// - smart_table.rs: SMART attribute meanings and semantic queries

pub mod identify;
pub mod monitor;
pub mod mounts;
pub mod smart_table;

pub use identify::{discover_capacity, identify_device, Capacity, CapacitySource, DeviceIdentity};
pub use monitor::{AtaMonitor, DeviceMonitor, MonitorSummary, ScsiMonitor, SmartSnapshot};
pub use mounts::{MountEntry, MountQuery, MountState, MountTable};
#[cfg(target_os = "linux")]
pub use mounts::SystemMounts;
pub use smart_table::{
    GenericTables, ModelOverrides, SmartAttrInfo, SmartAttrKind, SmartTable, SmartTableSource,
    TemperatureReading,
};
