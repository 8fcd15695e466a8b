use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::{Error, Result};
use crate::event::EventValue;
use crate::protocol::Sequence;

/// How a sensor's trigger payload is decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Button,
    Analog,
    Raw,
}

/// Input device on a remote node, reporting through ArtTrigger
#[derive(Debug, Clone)]
pub struct Sensor {
    pub name: String,
    pub kind: SensorKind,
    /// Last accepted sequence number from the node
    pub sequence: Sequence,
    pub muted: bool,
    /// Last reported button state, shared between clones
    pressed: Arc<AtomicBool>,
}

impl Sensor {
    pub fn new(name: impl Into<String>, kind: SensorKind, sequence: Sequence) -> Self {
        Sensor {
            name: name.into(),
            kind,
            sequence,
            muted: false,
            pressed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the button was last reported as held down
    pub fn is_pressed(&self) -> bool {
        self.pressed.load(Ordering::Acquire)
    }

    /// Decodes a trigger payload into an action and value
    ///
    /// Buttons only report changes: a payload repeating the current state
    /// yields `Ok(None)`. A payload that does not fit the sensor kind is a
    /// protocol error.
    pub fn parse_trigger_payload(
        &self,
        payload: &[u8],
    ) -> Result<Option<(&'static str, EventValue)>> {
        match (self.kind, payload) {
            (SensorKind::Button, [state]) => {
                let pressed = *state != 0;
                if self.pressed.swap(pressed, Ordering::AcqRel) == pressed {
                    return Ok(None);
                }
                let action = if pressed { "ButtonPressed" } else { "ButtonReleased" };
                Ok(Some((action, EventValue::Bool(pressed))))
            }
            (SensorKind::Analog, [hi, lo]) => Ok(Some((
                "ValueRead",
                u16::from_be_bytes([*hi, *lo]).into(),
            ))),
            (SensorKind::Raw, _) => Ok(Some((
                "TriggerReceived",
                EventValue::Text(hex::encode(payload)),
            ))),
            (kind, _) => Err(Error::protocol(format!(
                "{:?} payload of {} bytes",
                kind,
                payload.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor(kind: SensorKind) -> Sensor {
        Sensor::new("s", kind, Sequence::default())
    }

    #[test]
    fn test_button_payload() {
        let button = sensor(SensorKind::Button);
        assert_eq!(
            button.parse_trigger_payload(&[1]).unwrap(),
            Some(("ButtonPressed", EventValue::Bool(true)))
        );
        assert!(button.is_pressed());
        assert_eq!(
            button.parse_trigger_payload(&[0]).unwrap(),
            Some(("ButtonReleased", EventValue::Bool(false)))
        );
        assert!(button.parse_trigger_payload(&[]).is_err());
        assert!(button.parse_trigger_payload(&[1, 0]).is_err());
    }

    #[test]
    fn test_button_reports_changes_only() {
        let button = sensor(SensorKind::Button);

        // Starts released
        assert_eq!(button.parse_trigger_payload(&[0]).unwrap(), None);

        assert!(button.parse_trigger_payload(&[1]).unwrap().is_some());
        assert_eq!(button.parse_trigger_payload(&[1]).unwrap(), None);
        assert_eq!(button.parse_trigger_payload(&[0xff]).unwrap(), None);

        // Clones share the state
        let clone = button.clone();
        assert!(clone.parse_trigger_payload(&[0]).unwrap().is_some());
        assert!(!button.is_pressed());
    }

    #[test]
    fn test_analog_payload() {
        let analog = sensor(SensorKind::Analog);
        assert_eq!(
            analog.parse_trigger_payload(&[0x12, 0x34]).unwrap(),
            Some(("ValueRead", EventValue::Int(0x1234)))
        );
        // Analog readings fire even when unchanged
        assert!(analog.parse_trigger_payload(&[0x12, 0x34]).unwrap().is_some());
        assert!(analog.parse_trigger_payload(&[0x12]).is_err());
    }

    #[test]
    fn test_raw_payload() {
        let raw = sensor(SensorKind::Raw);
        assert_eq!(
            raw.parse_trigger_payload(&[0xde, 0xad, 0x01]).unwrap(),
            Some(("TriggerReceived", EventValue::Text("dead01".into())))
        );
        assert_eq!(
            raw.parse_trigger_payload(&[]).unwrap(),
            Some(("TriggerReceived", EventValue::Text(String::new())))
        );
    }
}
