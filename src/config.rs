//! Bridge and server configuration
//!
//! Both configs deserialize from JSON with per-field defaults, so a file only
//! needs the fields it changes. `validate()` runs before anything touches the
//! network; an invalid config never opens a socket.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BIND_ADDRESS, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_NUM_COILS,
    DEFAULT_NUM_DISCRETE_INPUTS, DEFAULT_POLL_INTERVAL, DEFAULT_RECONNECT_DELAY,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_TABLE_SIZE, DEFAULT_TCP_PORT, DEFAULT_UNIT_ID,
    MAX_POINT_COUNT, MIN_POINT_COUNT,
};
use crate::error::{ModbusError, ModbusResult};
use crate::table::TableSizes;

/// Client engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Server host name or IP
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    /// Coils polled from address 0
    pub num_coils: u16,
    pub num_discrete_inputs: u16,
    /// Emit every log level instead of errors only
    pub debug: bool,
    pub poll_interval_ms: u64,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub request_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_TCP_PORT,
            unit_id: DEFAULT_UNIT_ID,
            num_coils: DEFAULT_NUM_COILS,
            num_discrete_inputs: DEFAULT_NUM_DISCRETE_INPUTS,
            debug: false,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
        }
    }
}

impl BridgeConfig {
    /// Config for `host:port` with every other field at its default
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> ModbusResult<()> {
        if self.host.trim().is_empty() {
            return Err(ModbusError::configuration("host must not be empty"));
        }
        if self.port == 0 {
            return Err(ModbusError::configuration("port must be 1-65535"));
        }
        check_point_count("num_coils", self.num_coils)?;
        check_point_count("num_discrete_inputs", self.num_discrete_inputs)?;
        if self.poll_interval_ms == 0 {
            return Err(ModbusError::configuration("poll_interval_ms must be > 0"));
        }
        if self.request_timeout_ms == 0 {
            return Err(ModbusError::configuration("request_timeout_ms must be > 0"));
        }
        Ok(())
    }

    /// Read a JSON file and validate it
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ModbusResult<Self> {
        let config: Self = read_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Whether switching from `self` to `other` needs a new connection
    pub fn endpoint_differs(&self, other: &Self) -> bool {
        self.host != other.host || self.port != other.port
    }
}

fn check_point_count(field: &str, value: u16) -> ModbusResult<()> {
    if !(MIN_POINT_COUNT..=MAX_POINT_COUNT).contains(&value) {
        return Err(ModbusError::configuration(format!(
            "{} must be {}-{}, got {}",
            field, MIN_POINT_COUNT, MAX_POINT_COUNT, value
        )));
    }
    Ok(())
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub coils: usize,
    pub discrete_inputs: usize,
    pub holding_registers: usize,
    pub input_registers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            coils: DEFAULT_TABLE_SIZE,
            discrete_inputs: DEFAULT_TABLE_SIZE,
            holding_registers: DEFAULT_TABLE_SIZE,
            input_registers: DEFAULT_TABLE_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> ModbusResult<()> {
        self.socket_addr()?;
        for (name, size) in [
            ("coils", self.coils),
            ("discrete_inputs", self.discrete_inputs),
            ("holding_registers", self.holding_registers),
            ("input_registers", self.input_registers),
        ] {
            // Addresses are u16, so 65536 slots is the most that can be reached
            if size > usize::from(u16::MAX) + 1 {
                return Err(ModbusError::configuration(format!(
                    "{} table too large: {}",
                    name, size
                )));
            }
        }
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ModbusResult<Self> {
        let config: Self = read_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn socket_addr(&self) -> ModbusResult<SocketAddr> {
        self.bind_address.parse().map_err(|e| {
            ModbusError::configuration(format!(
                "Invalid bind address '{}': {}",
                self.bind_address, e
            ))
        })
    }

    pub fn table_sizes(&self) -> TableSizes {
        TableSizes {
            coils: self.coils,
            discrete_inputs: self.discrete_inputs,
            holding_registers: self.holding_registers,
            input_registers: self.input_registers,
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> ModbusResult<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ModbusError::configuration(format!("Failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        ModbusError::configuration(format!("Failed to parse {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.port, 502);
        assert_eq!(config.num_coils, 48);
        assert_eq!(config.num_discrete_inputs, 48);
        assert_eq!(config.poll_interval(), Duration::from_millis(1000));
        assert_eq!(config.reconnect_delay(), Duration::from_millis(5000));
        assert_eq!(config.max_reconnect_attempts, 100);
        assert!(!config.debug);
        assert!(config.validate().is_ok());

        let server = ServerConfig::default();
        assert_eq!(server.socket_addr().unwrap().port(), 502);
        assert_eq!(server.table_sizes(), TableSizes::default());
    }

    #[test]
    fn test_coil_count_bounds() {
        let mut config = BridgeConfig::default();
        config.num_coils = 0;
        assert!(matches!(config.validate(), Err(ModbusError::Configuration { .. })));
        config.num_coils = 1001;
        assert!(config.validate().is_err());
        config.num_coils = 1000;
        assert!(config.validate().is_ok());

        config.num_discrete_inputs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"host": "10.0.0.5", "num_coils": 16, "debug": true}"#;
        let config: BridgeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.num_coils, 16);
        assert!(config.debug);
        assert_eq!(config.port, 502);

        let server: ServerConfig = serde_json::from_str(r#"{"coils": 8}"#).unwrap();
        assert_eq!(server.coils, 8);
        assert_eq!(server.holding_registers, 100);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir()
            .join(format!("modbus_bridge_cfg_{}.json", std::process::id()));
        std::fs::write(&path, r#"{"host": "plc.local", "port": 1502}"#).unwrap();
        let config = BridgeConfig::load_from_file(&path).unwrap();
        assert_eq!(config.host, "plc.local");
        assert_eq!(config.port, 1502);

        std::fs::write(&path, r#"{"num_coils": 5000}"#).unwrap();
        assert!(BridgeConfig::load_from_file(&path).is_err());
        std::fs::remove_file(&path).unwrap();

        assert!(BridgeConfig::load_from_file("/nonexistent/bridge.json").is_err());
    }

    #[test]
    fn test_server_validation() {
        let mut server = ServerConfig::default();
        server.bind_address = "not an address".to_string();
        assert!(server.validate().is_err());

        let mut server = ServerConfig::default();
        server.coils = 70_000;
        assert!(server.validate().is_err());
    }

    #[test]
    fn test_endpoint_differs() {
        let a = BridgeConfig::new("a", 502);
        let mut b = a.clone();
        b.num_coils = 10;
        assert!(!a.endpoint_differs(&b));
        b.port = 503;
        assert!(a.endpoint_differs(&b));
    }
}
