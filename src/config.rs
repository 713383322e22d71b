//! Datalogger configuration.
//!
//! Loaded once at startup from a TOML file; every field has a default that
//! matches the field unit (station 'A', 100 Hz, 1500 items per sensor,
//! three buffers, geophone ADC + two 3-axis accelerometers).

use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fs, path::{Path, PathBuf}, time::Duration};

use crate::buffer::layout::{BufferLayout, SensorSpec};
use crate::error::{DataloggerError, Result};

/// Largest sample width a channel may declare.
pub const MAX_BYTES_PER_ITEM: u8 = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataloggerConfig {
    pub station_id: u8,
    pub sample_rate: u16,
    pub items_per_sensor: u16,
    pub pool_size: usize,
    #[serde(rename = "source")]
    pub sources: Vec<SourceConfig>,
    pub uplink: UplinkConfig,
    pub storage: StorageConfig,
    pub trigger: TriggerConfig,
    pub diagnostics: DiagnosticsConfig,
}

/// One physical sampling source (one record per tick), split into one or
/// more sensor regions in the buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub name: String,
    pub sensors: Vec<SensorConfig>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorConfig {
    pub id: u8,
    pub bytes_per_item: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UplinkConfig {
    /// Collector URL; no endpoint means the uplink never connects.
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
    pub content_type: String,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub probe_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub directory: PathBuf,
    pub catalog_batch: usize,
    pub catalog_interval_ms: u64,
    pub probe_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TriggerConfig {
    pub record_queue_depth: usize,
    pub pin_core: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiagnosticsConfig {
    pub router_wait_ms: u64,
    pub report_interval_ms: u64,
    pub event_log: Option<PathBuf>,
}

impl Default for DataloggerConfig {
    fn default() -> Self {
        let axis = |ids: [u8; 3], bytes_per_item: u8| {
            ids.iter()
                .map(|&id| SensorConfig { id, bytes_per_item })
                .collect::<Vec<_>>()
        };
        Self {
            station_id: b'A',
            sample_rate: 100,
            items_per_sensor: 1500,
            pool_size: 3,
            sources: vec![
                SourceConfig {
                    name: "geophone_adc".into(),
                    sensors: vec![SensorConfig { id: 0, bytes_per_item: 3 }],
                },
                SourceConfig {
                    name: "accel_20bit".into(),
                    sensors: axis([1, 2, 3], 3),
                },
                SourceConfig {
                    name: "accel_14bit".into(),
                    sensors: axis([4, 5, 6], 2),
                },
            ],
            uplink: UplinkConfig::default(),
            storage: StorageConfig::default(),
            trigger: TriggerConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 5_000,
            content_type: "application/x-www-form-urlencoded".into(),
            max_retries: 5,
            retry_backoff_ms: 200,
            probe_interval_ms: 1_000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data/pending"),
            catalog_batch: 5,
            catalog_interval_ms: 1_000,
            probe_interval_ms: 1_000,
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            record_queue_depth: 700,
            pin_core: None,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            router_wait_ms: 500,
            report_interval_ms: 10_000,
            event_log: None,
        }
    }
}

impl DataloggerConfig {
    /// Reads and validates a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.items_per_sensor == 0 {
            return Err(DataloggerError::Config("items_per_sensor must be > 0".into()));
        }
        if self.sample_rate == 0 {
            return Err(DataloggerError::Config("sample_rate must be > 0".into()));
        }
        if self.pool_size == 0 {
            return Err(DataloggerError::Config("pool_size must be > 0".into()));
        }
        if self.storage.catalog_batch == 0 {
            return Err(DataloggerError::Config("storage.catalog_batch must be > 0".into()));
        }
        if self.trigger.record_queue_depth == 0 {
            return Err(DataloggerError::Config("trigger.record_queue_depth must be > 0".into()));
        }
        if self.sources.is_empty() {
            return Err(DataloggerError::Config("at least one [[source]] is required".into()));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.sensors.is_empty() {
                return Err(DataloggerError::Config(format!(
                    "source '{}' declares no sensors",
                    source.name
                )));
            }
            for sensor in &source.sensors {
                if sensor.bytes_per_item == 0 || sensor.bytes_per_item > MAX_BYTES_PER_ITEM {
                    return Err(DataloggerError::Config(format!(
                        "sensor {} bytes_per_item must be within 1..={}",
                        sensor.id, MAX_BYTES_PER_ITEM
                    )));
                }
                if !seen.insert(sensor.id) {
                    return Err(DataloggerError::Config(format!(
                        "duplicate sensor id {}",
                        sensor.id
                    )));
                }
            }
        }
        if seen.len() > u8::MAX as usize {
            return Err(DataloggerError::Config(format!(
                "{} sensors configured, at most {} fit the header",
                seen.len(),
                u8::MAX
            )));
        }
        Ok(())
    }

    /// Sensor regions in send order, flattened across sources.
    pub fn sensor_specs(&self) -> Vec<SensorSpec> {
        self.sources
            .iter()
            .flat_map(|s| s.sensors.iter())
            .map(|s| SensorSpec {
                id: s.id,
                bytes_per_item: s.bytes_per_item as usize,
            })
            .collect()
    }

    /// Record width of each source, in source order.
    pub fn source_widths(&self) -> Vec<usize> {
        self.sources
            .iter()
            .map(|s| s.sensors.iter().map(|x| x.bytes_per_item as usize).sum())
            .collect()
    }

    pub fn layout(&self) -> Result<BufferLayout> {
        BufferLayout::new(
            self.items_per_sensor,
            self.sample_rate,
            self.station_id,
            &self.sensor_specs(),
        )
    }

    pub fn sample_period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.sample_rate.max(1) as u64)
    }
}

impl UplinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

impl StorageConfig {
    pub fn catalog_interval(&self) -> Duration {
        Duration::from_millis(self.catalog_interval_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

impl DiagnosticsConfig {
    pub fn router_wait(&self) -> Duration {
        Duration::from_millis(self.router_wait_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_the_field_unit() {
        let config = DataloggerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sensor_specs().len(), 7);
        assert_eq!(config.source_widths(), vec![3, 9, 6]);
        assert_eq!(config.layout().unwrap().max_buffer_size(), 27025);
    }

    #[test]
    fn parses_partial_toml_over_defaults() {
        let config = DataloggerConfig::from_toml_str(
            r#"
            station_id = 66
            items_per_sensor = 10
            pool_size = 4

            [[source]]
            name = "adc"
            sensors = [{ id = 9, bytes_per_item = 3 }]

            [uplink]
            endpoint = "http://127.0.0.1:9000/datalogger"
            max_retries = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.station_id, 66);
        assert_eq!(config.sample_rate, 100);
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.uplink.max_retries, 2);
        assert_eq!(config.uplink.timeout_ms, 5_000);
        assert_eq!(config.storage.catalog_batch, 5);
    }

    #[test]
    fn rejects_duplicate_sensor_ids() {
        let mut config = DataloggerConfig::default();
        config.sources[2].sensors[0].id = 1;
        assert!(matches!(config.validate(), Err(DataloggerError::Config(_))));
    }

    #[test]
    fn rejects_oversized_samples_and_empty_pool() {
        let mut config = DataloggerConfig::default();
        config.sources[0].sensors[0].bytes_per_item = 5;
        assert!(config.validate().is_err());

        let config = DataloggerConfig {
            pool_size: 0,
            ..DataloggerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = DataloggerConfig::from_toml_str("pool_sise = 3").unwrap_err();
        assert!(matches!(err, DataloggerError::ConfigParse(_)));
    }
}
