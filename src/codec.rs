//! Wire message encoding.
//!
//! One message carries a send timestamp and up to two hands:
//!
//! ```json
//! {
//!   "timestamp": 1718000000.125,
//!   "leftHand":  { "joints": [[x, y, z], ...], "trackedMask": 134217727 },
//!   "rightHand": null
//! }
//! ```
//!
//! A hand that was never captured, or whose mask is zero, is `null` rather
//! than a zero-filled hand. Field order is fixed by the struct definitions,
//! so identical input always produces identical bytes.

use serde::{Deserialize, Serialize};

use crate::error::EncodingError;
use crate::tracking::{Chirality, CombinedFrame, HandFrame, SkeletonLayout};

/// Serialized form of one hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireHand {
    /// Joint positions in layout order.
    pub joints: Vec<[f32; 3]>,
    /// Bit `i` set iff joint `i` is tracked.
    pub tracked_mask: u32,
}

/// Serialized form of one combined frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Send timestamp, seconds since the Unix epoch.
    pub timestamp: f64,
    /// Left hand, or `null`.
    pub left_hand: Option<WireHand>,
    /// Right hand, or `null`.
    pub right_hand: Option<WireHand>,
}

/// Decoded message with hands rebuilt as frames.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    /// Message timestamp.
    pub timestamp: f64,
    /// Left hand frame, stamped with the message timestamp.
    pub left: Option<HandFrame>,
    /// Right hand frame, stamped with the message timestamp.
    pub right: Option<HandFrame>,
}

/// Packs combined frames into JSON wire messages for one skeleton layout.
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    layout: SkeletonLayout,
}

impl FrameEncoder {
    /// Create an encoder expecting frames of `layout`.
    pub fn new(layout: SkeletonLayout) -> Self {
        Self { layout }
    }

    /// Layout this encoder enforces.
    pub fn layout(&self) -> SkeletonLayout {
        self.layout
    }

    /// Build the wire structure for a combined frame.
    pub fn to_wire(&self, combined: &CombinedFrame) -> Result<WireMessage, EncodingError> {
        Ok(WireMessage {
            timestamp: combined.timestamp,
            left_hand: self.wire_hand(Chirality::Left, combined.left.as_deref())?,
            right_hand: self.wire_hand(Chirality::Right, combined.right.as_deref())?,
        })
    }

    /// Encode a combined frame as a JSON string.
    pub fn encode(&self, combined: &CombinedFrame) -> Result<String, EncodingError> {
        let wire = self.to_wire(combined)?;
        serde_json::to_string(&wire).map_err(|e| EncodingError::SerializationFailed(e.to_string()))
    }

    /// Encode explicit hands under `timestamp`.
    pub fn encode_hands(
        &self,
        timestamp: f64,
        left: Option<&HandFrame>,
        right: Option<&HandFrame>,
    ) -> Result<String, EncodingError> {
        let wire = WireMessage {
            timestamp,
            left_hand: self.wire_hand(Chirality::Left, left)?,
            right_hand: self.wire_hand(Chirality::Right, right)?,
        };
        serde_json::to_string(&wire).map_err(|e| EncodingError::SerializationFailed(e.to_string()))
    }

    /// Parse a JSON wire message and rebuild its hands.
    pub fn decode(&self, text: &str) -> Result<DecodedMessage, EncodingError> {
        let wire: WireMessage =
            serde_json::from_str(text).map_err(|e| EncodingError::Malformed(e.to_string()))?;
        Ok(DecodedMessage {
            timestamp: wire.timestamp,
            left: self.frame_from_wire(Chirality::Left, wire.timestamp, wire.left_hand)?,
            right: self.frame_from_wire(Chirality::Right, wire.timestamp, wire.right_hand)?,
        })
    }

    fn wire_hand(
        &self,
        slot: Chirality,
        frame: Option<&HandFrame>,
    ) -> Result<Option<WireHand>, EncodingError> {
        let Some(frame) = frame else {
            return Ok(None);
        };
        if frame.chirality() != slot {
            return Err(EncodingError::SerializationFailed(format!(
                "{} hand frame placed in {} slot",
                frame.chirality(),
                slot
            )));
        }
        if frame.joints().len() != self.layout.joint_count() {
            return Err(EncodingError::SerializationFailed(format!(
                "{} hand has {} joints, expected {}",
                slot,
                frame.joints().len(),
                self.layout.joint_count()
            )));
        }
        if !frame.is_tracked() {
            return Ok(None);
        }
        Ok(Some(WireHand {
            joints: frame.joints().iter().map(|j| j.position).collect(),
            tracked_mask: frame.tracked_mask().bits(),
        }))
    }

    fn frame_from_wire(
        &self,
        chirality: Chirality,
        timestamp: f64,
        hand: Option<WireHand>,
    ) -> Result<Option<HandFrame>, EncodingError> {
        let Some(hand) = hand else {
            return Ok(None);
        };
        let count = self.layout.joint_count();
        if hand.joints.len() != count {
            return Err(EncodingError::Malformed(format!(
                "{} hand has {} joints, expected {}",
                chirality,
                hand.joints.len(),
                count
            )));
        }
        if hand.tracked_mask & !self.layout.full_mask() != 0 {
            return Err(EncodingError::Malformed(format!(
                "{} hand mask {:#x} has bits beyond joint {}",
                chirality,
                hand.tracked_mask,
                count - 1
            )));
        }
        let mask = hand.tracked_mask;
        let joints = hand
            .joints
            .into_iter()
            .enumerate()
            .map(|(i, position)| (position, mask & (1 << i) != 0));
        HandFrame::new(self.layout, chirality, timestamp, joints)
            .map(Some)
            .map_err(|e| EncodingError::Malformed(e.to_string()))
    }
}
