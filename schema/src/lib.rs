//! Schema definitions for Spica
//!
//! This crate contains the data structures shared between the check engine
//! and its hosts: the wire shapes served over HTTP (PascalCase, matching the
//! published endpoint contract) and the host configuration types (camelCase
//! TOML). All types implement JSON Schema generation for external
//! consumption.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One listable test entry, scoped to a single target
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct TestEntry {
    /// Unique test name (collision-suffixed at registration)
    pub name: String,
    /// Target environment, original casing
    pub environment: String,
    /// Target application, original casing
    pub application: String,
    /// Absolute URL that executes this entry
    pub url: String,
    /// Tags attached to the test, omitted when empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Effective parameter values for this entry (defaults or case values)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, Value>>,
}

/// Body of a list response
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct TestList {
    /// Entries sorted by URL ascending
    pub tests: Vec<TestEntry>,
}

/// Body of an execute response
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct ExecutionReport {
    /// Value produced by the check (null for unit-shaped checks and failures)
    pub return_value: Value,
    /// Whether the check completed without raising
    pub passed: bool,
    /// Diagnostic output captured during this execution only
    pub log: String,
    /// Failure description, omitted on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    /// Wall-clock execution time in whole milliseconds
    pub duration: u64,
}

/// Serializable view of a target, as returned by checks that echo their scope
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct TargetInfo {
    /// Environment name, original casing
    pub environment: String,
    /// Application name, original casing
    pub application: String,
    /// Absolute base address for the target's dependencies
    pub base_address: String,
}

/// A single sensor reading
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct SensorReading {
    /// Sensor name
    pub name: String,
    /// Component that registered the sensor
    pub declaring_component: String,
    /// Read value, omitted when the sensor raised
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Failure description, omitted on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Read time in whole milliseconds
    pub duration: u64,
}

/// Host configuration for the embedded engine
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    /// Host to bind the HTTP listener to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind the HTTP listener to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Root path under which checks are exposed
    #[serde(default = "default_check_root")]
    pub check_root: String,
    /// Root path under which sensors are exposed
    #[serde(default = "default_sensor_root")]
    pub sensor_root: String,
    /// Externally visible base URL used when building listing URLs;
    /// defaults to `http://{host}:{port}` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_base: Option<String>,
    /// Targets registered at startup
    #[serde(default)]
    pub targets: Vec<TargetSpec>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            check_root: default_check_root(),
            sensor_root: default_sensor_root(),
            public_base: None,
            targets: Vec::new(),
        }
    }
}

/// One target to register at startup
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetSpec {
    /// Environment name, e.g. "staging"
    pub environment: String,
    /// Application name, e.g. "widgetapi"
    pub application: String,
    /// Absolute base URI for the target's default dependencies
    pub base_address: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8181
}

fn default_check_root() -> String {
    "/tests".to_string()
}

fn default_sensor_root() -> String {
    "/sensors".to_string()
}
