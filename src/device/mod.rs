//! Devices attached to remote nodes
//!
//! Sensors report through ArtTrigger and are owned by the inbound router.
//! Fixtures are driven with ArtDmx and handed out as cloneable handles.

mod fixture;
mod manifest;
mod sensor;

pub use self::fixture::{Fixture, Retransmit};
pub use self::manifest::{derive_universe, DeviceKind, DeviceManifest, DeviceSpec};
pub use self::sensor::{Sensor, SensorKind};

use std::collections::HashMap;
use tracing::info;

use crate::core::{Config, Result};
use crate::network::{SharedRegistry, Transport};
use crate::protocol::{Sequence, SequenceGuard};

/// Any device
#[derive(Debug, Clone)]
pub enum Device {
    Sensor(Sensor),
    Fixture(Fixture),
}

impl Device {
    pub fn name(&self) -> &str {
        match self {
            Device::Sensor(sensor) => &sensor.name,
            Device::Fixture(fixture) => fixture.name(),
        }
    }
}

/// Devices instantiated from a manifest
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    /// Instantiates every manifest device and pre-registers its node
    ///
    /// Must be called inside a Tokio runtime.
    pub fn from_manifest(
        manifest: &DeviceManifest,
        config: &Config,
        transport: &Transport,
        nodes: &SharedRegistry,
    ) -> Result<Self> {
        manifest.validate()?;
        let guard = SequenceGuard::new(config.sequence_window);
        let retransmit = Retransmit {
            count: config.retransmit_count,
            interval: config.retransmit_interval,
        };

        let mut devices = Vec::new();
        for (node, spec) in manifest.devices() {
            let sequence = Sequence::new(guard);
            let device = match &spec.kind {
                DeviceKind::Button => Device::Sensor(sensor(spec, SensorKind::Button, sequence)),
                DeviceKind::Analog => Device::Sensor(sensor(spec, SensorKind::Analog, sequence)),
                DeviceKind::Raw => Device::Sensor(sensor(spec, SensorKind::Raw, sequence)),
                DeviceKind::Fixture { universe, channels } => {
                    let universe = universe.unwrap_or_else(|| derive_universe(&spec.name));
                    Device::Fixture(Fixture::new(
                        spec.name.clone(),
                        node,
                        universe,
                        *channels,
                        sequence,
                        retransmit,
                        transport.clone(),
                        nodes.clone(),
                    )?)
                }
            };
            devices.push(device);
        }

        {
            let mut registry = nodes.write();
            for (node, specs) in &manifest.nodes {
                registry.add_expected(node, specs.iter().map(|s| s.name.clone()));
            }
        }

        info!(
            "Loaded {} devices on {} nodes",
            devices.len(),
            manifest.nodes.len()
        );
        Ok(DeviceRegistry { devices })
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn get(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name() == name)
    }

    /// Splits into sensors and fixtures, each keyed by name
    pub fn into_parts(self) -> (HashMap<String, Sensor>, HashMap<String, Fixture>) {
        let mut sensors = HashMap::new();
        let mut fixtures = HashMap::new();
        for device in self.devices {
            match device {
                Device::Sensor(sensor) => {
                    sensors.insert(sensor.name.clone(), sensor);
                }
                Device::Fixture(fixture) => {
                    fixtures.insert(fixture.name().to_string(), fixture);
                }
            }
        }
        (sensors, fixtures)
    }
}

fn sensor(spec: &DeviceSpec, kind: SensorKind, sequence: Sequence) -> Sensor {
    let mut sensor = Sensor::new(spec.name.clone(), kind, sequence);
    sensor.muted = spec.muted;
    sensor
}
