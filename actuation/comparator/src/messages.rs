//! Actuation request messages carried inside transport envelopes.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shared_event_bus::Envelope;

use crate::error::{ComparatorError, Result};
use crate::registry::SignalKind;

/// A decodable message with a fixed data type id and one scalar value.
pub trait Message: DeserializeOwned + Serialize {
    /// Data type id on the wire.
    const ID: i32;

    /// Scalar value fed into the windows.
    fn value(&self) -> f32;
}

/// Requested ground steering angle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundSteeringRequest {
    /// Steering angle in radians.
    pub ground_steering: f32,
}

impl Message for GroundSteeringRequest {
    const ID: i32 = 1090;

    fn value(&self) -> f32 {
        self.ground_steering
    }
}

/// Requested pedal position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PedalPositionRequest {
    /// Pedal position, negative when braking.
    pub position: f32,
}

impl Message for PedalPositionRequest {
    const ID: i32 = 1086;

    fn value(&self) -> f32 {
        self.position
    }
}

impl SignalKind {
    /// Data type id of the message that carries this kind.
    #[must_use]
    pub const fn data_type(self) -> i32 {
        match self {
            Self::Steering => GroundSteeringRequest::ID,
            Self::Pedal => PedalPositionRequest::ID,
        }
    }

    /// Decodes the scalar value of this kind from an envelope.
    pub fn decode(self, envelope: &Envelope) -> Result<f32> {
        match self {
            Self::Steering => extract_message::<GroundSteeringRequest>(envelope).map(|m| m.value()),
            Self::Pedal => extract_message::<PedalPositionRequest>(envelope).map(|m| m.value()),
        }
    }
}

/// Decodes an envelope's payload as `M`.
pub fn extract_message<M: Message>(envelope: &Envelope) -> Result<M> {
    if envelope.data_type != M::ID {
        return Err(ComparatorError::Decode(format!(
            "expected data type {}, got {}",
            M::ID,
            envelope.data_type
        )));
    }
    M::deserialize(&envelope.payload)
        .map_err(|err| ComparatorError::Decode(format!("data type {}: {err}", M::ID)))
}

/// Wraps a message into an envelope from `sender_stamp`.
pub fn envelope_for<M: Message>(message: &M, sender_stamp: u32) -> Result<Envelope> {
    let payload = serde_json::to_value(message)
        .map_err(|err| ComparatorError::Decode(format!("data type {}: {err}", M::ID)))?;
    Ok(Envelope::new(M::ID, sender_stamp, payload))
}
