// SMART attribute meaning table and the semantic queries built on it
//
// Attribute ids are vendor-defined. A table maps the handful of meanings the
// scan cares about onto ids for one device family; the queries below resolve
// those meanings against a live attribute set.

use crate::ata::smart::{SmartAttributeRecord, SmartData};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SmartAttrKind {
    Temperature,
    PowerOnHours,
    Reallocated,
    PendingReallocation,
    CrcErrors,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartAttrInfo {
    pub id: u8,
    pub name: String,
    pub kind: SmartAttrKind,
    /// Temperature is `offset - value` on drives that leave the raw counter
    /// empty.
    pub offset: Option<i32>,
}

impl SmartAttrInfo {
    fn new(id: u8, name: &str, kind: SmartAttrKind) -> Self {
        Self {
            id,
            name: name.to_string(),
            kind,
            offset: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartTable {
    pub name: String,
    pub attrs: Vec<SmartAttrInfo>,
}

/// Temperature in degrees Celsius with the lifetime range when the drive
/// reports one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TemperatureReading {
    pub current: i32,
    pub min: Option<i32>,
    pub max: Option<i32>,
}

impl SmartTable {
    /// Ids shared by most ATA drives.
    pub fn generic() -> Self {
        use SmartAttrKind::*;
        let mut airflow = SmartAttrInfo::new(190, "Airflow_Temperature_Cel", Other);
        airflow.offset = Some(100);
        Self {
            name: "generic".to_string(),
            attrs: vec![
                SmartAttrInfo::new(1, "Raw_Read_Error_Rate", Other),
                SmartAttrInfo::new(3, "Spin_Up_Time", Other),
                SmartAttrInfo::new(4, "Start_Stop_Count", Other),
                SmartAttrInfo::new(5, "Reallocated_Sector_Ct", Reallocated),
                SmartAttrInfo::new(7, "Seek_Error_Rate", Other),
                SmartAttrInfo::new(9, "Power_On_Hours", PowerOnHours),
                SmartAttrInfo::new(10, "Spin_Retry_Count", Other),
                SmartAttrInfo::new(12, "Power_Cycle_Count", Other),
                airflow,
                SmartAttrInfo::new(194, "Temperature_Celsius", Temperature),
                SmartAttrInfo::new(196, "Reallocated_Event_Count", Other),
                SmartAttrInfo::new(197, "Current_Pending_Sector", PendingReallocation),
                SmartAttrInfo::new(198, "Offline_Uncorrectable", Other),
                SmartAttrInfo::new(199, "UDMA_CRC_Error_Count", CrcErrors),
            ],
        }
    }

    pub fn attr_for_id(&self, id: u8) -> Option<&SmartAttrInfo> {
        self.attrs.iter().find(|a| a.id == id)
    }

    pub fn attr_for_kind(&self, kind: SmartAttrKind) -> Option<&SmartAttrInfo> {
        self.attrs.iter().find(|a| a.kind == kind)
    }

    pub fn name_for(&self, id: u8) -> &str {
        self.attr_for_id(id).map(|a| a.name.as_str()).unwrap_or("Unknown_Attribute")
    }

    fn lookup<'a>(
        &'a self,
        data: &'a SmartData,
        kind: SmartAttrKind,
    ) -> Option<(&'a SmartAttrInfo, &'a SmartAttributeRecord)> {
        let info = self.attr_for_kind(kind)?;
        let record = data.attribute(info.id)?;
        Some((info, record))
    }

    /// Current temperature. The lifetime range is reported only when the
    /// raw counter's upper words bracket the current value; otherwise the
    /// encoding is unknown and the range is dropped.
    pub fn temperature(&self, data: &SmartData) -> Option<TemperatureReading> {
        let (info, record) = self.lookup(data, SmartAttrKind::Temperature)?;

        if record.raw == 0 {
            let offset = info.offset?;
            return Some(TemperatureReading {
                current: offset - record.value as i32,
                min: None,
                max: None,
            });
        }

        let current = (record.raw & 0xFFFF) as i32;
        let min = ((record.raw >> 16) & 0xFFFF) as i32;
        let max = ((record.raw >> 32) & 0xFFFF) as i32;
        let bracketed = min <= current && current <= max;
        Some(TemperatureReading {
            current,
            min: bracketed.then_some(min),
            max: bracketed.then_some(max),
        })
    }

    pub fn power_on_hours(&self, data: &SmartData) -> Option<u64> {
        self.raw_counter(data, SmartAttrKind::PowerOnHours)
    }

    pub fn reallocations(&self, data: &SmartData) -> Option<u64> {
        self.raw_counter(data, SmartAttrKind::Reallocated)
    }

    pub fn pending_reallocations(&self, data: &SmartData) -> Option<u64> {
        self.raw_counter(data, SmartAttrKind::PendingReallocation)
    }

    pub fn crc_errors(&self, data: &SmartData) -> Option<u64> {
        self.raw_counter(data, SmartAttrKind::CrcErrors)
    }

    fn raw_counter(&self, data: &SmartData, kind: SmartAttrKind) -> Option<u64> {
        self.lookup(data, kind).map(|(_, record)| record.raw)
    }
}

/// Supplies the table for a device.
pub trait SmartTableSource {
    fn table_for_device(&self, vendor: &str, model: &str, firmware: &str) -> SmartTable;
}

/// Returns the generic table for every device.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericTables;

impl SmartTableSource for GenericTables {
    fn table_for_device(&self, _vendor: &str, _model: &str, _firmware: &str) -> SmartTable {
        SmartTable::generic()
    }
}

/// A generic table with per-model overrides, matched by model prefix.
#[derive(Debug, Clone, Default)]
pub struct ModelOverrides {
    overrides: Vec<(String, SmartTable)>,
}

impl ModelOverrides {
    pub fn with(mut self, model_prefix: impl Into<String>, table: SmartTable) -> Self {
        self.overrides.push((model_prefix.into(), table));
        self
    }
}

impl SmartTableSource for ModelOverrides {
    fn table_for_device(&self, vendor: &str, model: &str, firmware: &str) -> SmartTable {
        match self.overrides.iter().find(|(prefix, _)| model.starts_with(prefix.as_str())) {
            Some((_, table)) => {
                tracing::debug!(vendor, model, firmware, table = %table.name, "SMART table override");
                table.clone()
            }
            None => SmartTable::generic(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u8, value: u8, raw: u64) -> SmartAttributeRecord {
        SmartAttributeRecord {
            id,
            status_flags: 0,
            value,
            worst: value,
            threshold: None,
            raw,
        }
    }

    fn data(records: Vec<SmartAttributeRecord>) -> SmartData {
        SmartData {
            version: 0x10,
            attributes: records,
        }
    }

    #[test]
    fn test_temperature_with_history() {
        let table = SmartTable::generic();
        // current 38, min 21, max 52
        let raw = 38 | 21 << 16 | 52 << 32;
        let reading = table.temperature(&data(vec![record(194, 38, raw)])).unwrap();
        assert_eq!(reading.current, 38);
        assert_eq!(reading.min, Some(21));
        assert_eq!(reading.max, Some(52));
    }

    #[test]
    fn test_temperature_unbracketed_history_dropped() {
        let table = SmartTable::generic();
        let raw = 40 | 0x55 << 16 | 0x10 << 32;
        let reading = table.temperature(&data(vec![record(194, 40, raw)])).unwrap();
        assert_eq!(reading.current, 40);
        assert_eq!(reading.min, None);
        assert_eq!(reading.max, None);
    }

    #[test]
    fn test_temperature_from_offset() {
        let mut table = SmartTable::generic();
        table.attrs.retain(|a| a.id != 194);
        table.attrs.iter_mut().filter(|a| a.id == 190).for_each(|a| a.kind = SmartAttrKind::Temperature);
        let reading = table.temperature(&data(vec![record(190, 64, 0)])).unwrap();
        assert_eq!(reading.current, 36);
    }

    #[test]
    fn test_queries_distinguish_missing_from_zero() {
        let table = SmartTable::generic();
        let attrs = data(vec![record(5, 100, 0), record(9, 90, 12345)]);

        assert_eq!(table.reallocations(&attrs), Some(0));
        assert_eq!(table.power_on_hours(&attrs), Some(12345));
        assert_eq!(table.pending_reallocations(&attrs), None, "not reported");
        assert_eq!(table.crc_errors(&attrs), None);
        assert_eq!(table.temperature(&attrs), None);
    }

    #[test]
    fn test_unmapped_kind_is_unavailable() {
        let table = SmartTable {
            name: "empty".to_string(),
            attrs: Vec::new(),
        };
        assert_eq!(table.reallocations(&data(vec![record(5, 100, 7)])), None);
    }

    #[test]
    fn test_model_overrides() {
        let mut special = SmartTable::generic();
        special.name = "special".to_string();
        let source = ModelOverrides::default().with("WDC WD", special);

        assert_eq!(source.table_for_device("ATA", "WDC WD40EFRX", "82.00A82").name, "special");
        assert_eq!(source.table_for_device("ATA", "ST4000DM004", "0001").name, "generic");
        assert_eq!(GenericTables.table_for_device("", "", "").name_for(199), "UDMA_CRC_Error_Count");
    }
}
