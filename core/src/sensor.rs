//! Sensors: ungated, target-independent diagnostic probes
//!
//! A sensor is read-only and never gated by applicability. Reads normalize
//! the produced value through `serde_json::to_value`, capture failures onto
//! the reading instead of propagating them, and isolate failures per sensor
//! when reading everything at once.

use async_trait::async_trait;
use schema::SensorReading;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

/// A failure raised while reading a sensor
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SensorFailure {
    message: String,
}

impl SensorFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for SensorFailure {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("failed to serialize sensor value: {}", err))
    }
}

/// Trait for sensor implementations
#[async_trait]
pub trait Sensor: Send + Sync {
    /// Unique sensor name, as addressed in the URL
    fn name(&self) -> &str;

    /// Component that declared the sensor
    fn declaring_component(&self) -> &str {
        ""
    }

    /// Produce the current value
    async fn read(&self) -> Result<Value, SensorFailure>;
}

/// Closure-backed sensor, the common registration path
struct FnSensor<F> {
    name: String,
    declaring: String,
    read: F,
}

#[async_trait]
impl<F, Fut, T> Sensor for FnSensor<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, SensorFailure>> + Send,
    T: serde::Serialize + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn declaring_component(&self) -> &str {
        &self.declaring
    }

    async fn read(&self) -> Result<Value, SensorFailure> {
        let value = (self.read)().await?;
        Ok(serde_json::to_value(value)?)
    }
}

/// All registered sensors, in registration order
#[derive(Default)]
pub struct SensorSet {
    sensors: Vec<Box<dyn Sensor>>,
    by_name: HashMap<String, usize>,
}

impl std::fmt::Debug for SensorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorSet")
            .field("sensors", &self.sensors.len())
            .finish()
    }
}

impl SensorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sensor implementation. A duplicate name replaces nothing
    /// and is ignored.
    pub fn add(&mut self, sensor: Box<dyn Sensor>) {
        let name = sensor.name().to_string();
        if self.by_name.contains_key(&name) {
            debug!("duplicate sensor '{}' ignored", name);
            return;
        }
        self.by_name.insert(name, self.sensors.len());
        self.sensors.push(sensor);
    }

    /// Register an async closure as a sensor
    pub fn register<F, Fut, T>(&mut self, name: &str, declaring: &str, read: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, SensorFailure>> + Send + 'static,
        T: serde::Serialize + Send + 'static,
    {
        self.add(Box::new(FnSensor {
            name: name.to_string(),
            declaring: declaring.to_string(),
            read,
        }));
    }

    /// Sensor names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sensors.iter().map(|sensor| sensor.name())
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Read one sensor; `None` when the name is unknown
    pub async fn read(&self, name: &str) -> Option<SensorReading> {
        let sensor = self.by_name.get(name).map(|i| &self.sensors[*i])?;
        Some(read_one(sensor.as_ref()).await)
    }

    /// Read every sensor, isolating failures per sensor
    pub async fn read_all(&self) -> Vec<SensorReading> {
        let mut readings = Vec::with_capacity(self.sensors.len());
        for sensor in &self.sensors {
            readings.push(read_one(sensor.as_ref()).await);
        }
        readings
    }
}

async fn read_one(sensor: &dyn Sensor) -> SensorReading {
    let started = Instant::now();
    let result = sensor.read().await;
    let duration = started.elapsed().as_millis() as u64;
    match result {
        Ok(value) => SensorReading {
            name: sensor.name().to_string(),
            declaring_component: sensor.declaring_component().to_string(),
            value: Some(value),
            error: None,
            duration,
        },
        Err(failure) => SensorReading {
            name: sensor.name().to_string(),
            declaring_component: sensor.declaring_component().to_string(),
            value: None,
            error: Some(failure.to_string()),
            duration,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_read_normalizes_value() {
        let mut set = SensorSet::new();
        set.register("queue_depth", "queues", || async { Ok(42u64) });

        let reading = set.read("queue_depth").await.expect("known sensor");
        assert_eq!(reading.value, Some(json!(42)));
        assert!(reading.error.is_none());
        assert_eq!(reading.declaring_component, "queues");
    }

    #[tokio::test]
    async fn test_unknown_sensor_is_none() {
        let set = SensorSet::new();
        assert!(set.read("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_read_all_isolates_failures() {
        let mut set = SensorSet::new();
        set.register("ok_first", "t", || async { Ok("fine") });
        set.register("broken", "t", || async {
            Err::<String, _>(SensorFailure::new("disk on fire"))
        });
        set.register("ok_last", "t", || async { Ok(true) });

        let readings = set.read_all().await;
        assert_eq!(readings.len(), 3);
        assert_eq!(readings[0].value, Some(json!("fine")));
        assert_eq!(readings[1].error.as_deref(), Some("disk on fire"));
        assert!(readings[1].value.is_none());
        assert_eq!(readings[2].value, Some(json!(true)));
    }

    #[tokio::test]
    async fn test_duplicate_name_keeps_first() {
        let mut set = SensorSet::new();
        set.register("uptime", "a", || async { Ok(1) });
        set.register("uptime", "b", || async { Ok(2) });

        let reading = set.read("uptime").await.unwrap();
        assert_eq!(reading.declaring_component, "a");
        assert_eq!(set.names().count(), 1);
    }
}
