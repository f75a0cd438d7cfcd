//! Packed bitfield identifier algebra.
//!
//! ```text
//! PylonId    (7 bits)  = envId[2] . 0[1] . deviceIndex[4]   // deviceIndex in 1..=15
//! ClientId   (7 bits)  = envId[2] . 1[1] . deviceIndex[4]   // deviceIndex in 0..=15
//! WorkspaceId(14 bits) = PylonId[7]    . workspaceIndex[7]  // workspaceIndex in 1..=127
//! ConvId     (24 bits) = WorkspaceId[14] . convIndex[10]    // convIndex in 1..=1023
//! ```
//!
//! Every identifier is a newtype over its narrowest native integer so the
//! type system — not convention — stops a `WorkspaceId` from being passed
//! where a `ConvId` is expected.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment tag carried in the top two bits of every device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    Release,
    Stage,
    Dev,
}

impl Env {
    fn from_bits(bits: u8) -> Result<Self> {
        match bits {
            0 => Ok(Env::Release),
            1 => Ok(Env::Stage),
            2 => Ok(Env::Dev),
            other => Err(Error::InvalidId(format!("envId {other} out of range 0..=2"))),
        }
    }

    fn bits(self) -> u8 {
        match self {
            Env::Release => 0,
            Env::Stage => 1,
            Env::Dev => 2,
        }
    }
}

const TYPE_BIT_PYLON: u8 = 0;
const TYPE_BIT_CLIENT: u8 = 1;

/// A worker process's 7-bit device identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PylonId(u8);

/// A client device's (app or viewer transport) 7-bit identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(u8);

/// A workspace's 14-bit identity, unique within its owning Pylon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(u16);

/// A conversation's 24-bit identity, unique within its owning workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConvId(u32);

impl PylonId {
    pub fn raw(self) -> u8 {
        self.0
    }
}

impl ClientId {
    pub fn raw(self) -> u8 {
        self.0
    }
}

impl WorkspaceId {
    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn pylon(self) -> PylonId {
        PylonId((self.0 >> 7) as u8)
    }
}

impl ConvId {
    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn workspace(self) -> WorkspaceId {
        WorkspaceId((self.0 >> 10) as u16)
    }

    pub fn pylon(self) -> PylonId {
        PylonId((self.0 >> 17) as u8)
    }
}

/// `encodePylon(env, idx) -> PylonId`. `idx` must be in `1..=15`.
pub fn encode_pylon(env: Env, device_index: u8) -> Result<PylonId> {
    if !(1..=15).contains(&device_index) {
        return Err(Error::InvalidId(format!(
            "pylon deviceIndex {device_index} out of range 1..=15"
        )));
    }
    Ok(PylonId((env.bits() << 5) | (TYPE_BIT_PYLON << 4) | device_index))
}

/// `encodeClient(env, idx) -> ClientId`. `idx` must be in `0..=15`.
pub fn encode_client(env: Env, device_index: u8) -> Result<ClientId> {
    if device_index > 15 {
        return Err(Error::InvalidId(format!(
            "client deviceIndex {device_index} out of range 0..=15"
        )));
    }
    Ok(ClientId((env.bits() << 5) | (TYPE_BIT_CLIENT << 4) | device_index))
}

/// `encodeWorkspace(pylon, idx) -> WorkspaceId`. `idx` must be in `1..=127`.
pub fn encode_workspace(pylon: PylonId, workspace_index: u8) -> Result<WorkspaceId> {
    if !(1..=127).contains(&workspace_index) {
        return Err(Error::InvalidId(format!(
            "workspaceIndex {workspace_index} out of range 1..=127"
        )));
    }
    Ok(WorkspaceId(((pylon.0 as u16) << 7) | workspace_index as u16))
}

/// `encodeConversation(ws, idx) -> ConvId`. `idx` must be in `1..=1023`.
pub fn encode_conversation(workspace: WorkspaceId, conv_index: u16) -> Result<ConvId> {
    if !(1..=1023).contains(&conv_index) {
        return Err(Error::InvalidId(format!(
            "convIndex {conv_index} out of range 1..=1023"
        )));
    }
    Ok(ConvId(((workspace.0 as u32) << 10) | conv_index as u32))
}

/// Decoded `(env, deviceIndex)` pair for a `PylonId`.
pub struct DecodedPylon {
    pub env: Env,
    pub device_index: u8,
}

pub fn decode_pylon(id: PylonId) -> Result<DecodedPylon> {
    if id.0 & 0b1_0000 != 0 {
        return Err(Error::InvalidId("PylonId has client type bit set".into()));
    }
    Ok(DecodedPylon {
        env: Env::from_bits(id.0 >> 5)?,
        device_index: id.0 & 0b1111,
    })
}

pub struct DecodedClient {
    pub env: Env,
    pub device_index: u8,
}

pub fn decode_client(id: ClientId) -> Result<DecodedClient> {
    if id.0 & 0b1_0000 == 0 {
        return Err(Error::InvalidId("ClientId has pylon type bit set".into()));
    }
    Ok(DecodedClient {
        env: Env::from_bits(id.0 >> 5)?,
        device_index: id.0 & 0b1111,
    })
}

pub struct DecodedWorkspace {
    pub pylon: PylonId,
    pub workspace_index: u8,
}

pub fn decode_workspace(id: WorkspaceId) -> DecodedWorkspace {
    DecodedWorkspace {
        pylon: id.pylon(),
        workspace_index: (id.0 & 0b111_1111) as u8,
    }
}

/// Every field packed into a `ConvId`: its owning pylon, workspace and
/// conversation indices.
pub struct DecodedConversation {
    pub pylon: PylonId,
    pub workspace: WorkspaceId,
    pub workspace_index: u8,
    pub conv_index: u16,
}

pub fn decode_conversation_full(id: ConvId) -> DecodedConversation {
    let workspace = id.workspace();
    DecodedConversation {
        pylon: id.pylon(),
        workspace,
        workspace_index: (workspace.0 & 0b111_1111) as u8,
        conv_index: (id.0 & 0b11_1111_1111) as u16,
    }
}

/// Tests the type bit of a raw 7-bit device id: `true` for a Pylon id,
/// `false` for a Client id.
pub fn is_pylon_id(raw: u8) -> bool {
    raw & 0b1_0000 == 0
}

/// Construct a `PylonId` from a raw wire integer, validating its shape.
impl TryFrom<u8> for PylonId {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self> {
        if raw > 0b111_1111 {
            return Err(Error::InvalidId(format!("PylonId {raw} exceeds 7 bits")));
        }
        let id = PylonId(raw);
        decode_pylon(id)?;
        Ok(id)
    }
}

impl TryFrom<u8> for ClientId {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self> {
        if raw > 0b111_1111 {
            return Err(Error::InvalidId(format!("ClientId {raw} exceeds 7 bits")));
        }
        let id = ClientId(raw);
        decode_client(id)?;
        Ok(id)
    }
}

impl TryFrom<u16> for WorkspaceId {
    type Error = Error;

    fn try_from(raw: u16) -> Result<Self> {
        if raw > 0b11_1111_1111_1111 {
            return Err(Error::InvalidId(format!("WorkspaceId {raw} exceeds 14 bits")));
        }
        Ok(WorkspaceId(raw))
    }
}

impl TryFrom<u32> for ConvId {
    type Error = Error;

    fn try_from(raw: u32) -> Result<Self> {
        if raw > 0xFF_FFFF {
            return Err(Error::InvalidId(format!("ConvId {raw} exceeds 24 bits")));
        }
        Ok(ConvId(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pylon_round_trip() {
        let pylon = encode_pylon(Env::Dev, 1).unwrap();
        assert_eq!(pylon.raw(), 65); // (2<<5)|0|1
        let decoded = decode_pylon(pylon).unwrap();
        assert_eq!(decoded.env, Env::Dev);
        assert_eq!(decoded.device_index, 1);
    }

    #[test]
    fn client_round_trip() {
        let client = encode_client(Env::Release, 0).unwrap();
        let decoded = decode_client(client).unwrap();
        assert_eq!(decoded.env, Env::Release);
        assert_eq!(decoded.device_index, 0);
    }

    #[test]
    fn pylon_out_of_range_fails() {
        assert!(encode_pylon(Env::Dev, 0).is_err());
        assert!(encode_pylon(Env::Dev, 16).is_err());
    }

    #[test]
    fn client_out_of_range_fails() {
        assert!(encode_client(Env::Dev, 16).is_err());
    }

    #[test]
    fn conversation_extracts_owning_pylon() {
        let pylon = encode_pylon(Env::Dev, 1).unwrap();
        let workspace = encode_workspace(pylon, 1).unwrap();
        let conv = encode_conversation(workspace, 1).unwrap();
        assert_eq!(conv.pylon(), pylon);
        assert_eq!(conv.workspace(), workspace);
    }

    #[test]
    fn full_decode_round_trips_every_field() {
        let pylon = encode_pylon(Env::Stage, 7).unwrap();
        let workspace = encode_workspace(pylon, 42).unwrap();
        let conv = encode_conversation(workspace, 777).unwrap();

        let decoded = decode_conversation_full(conv);
        assert_eq!(decoded.pylon, pylon);
        assert_eq!(decoded.workspace, workspace);
        assert_eq!(decoded.workspace_index, 42);
        assert_eq!(decoded.conv_index, 777);
    }

    #[test]
    fn workspace_index_exhaustion_boundaries() {
        let pylon = encode_pylon(Env::Dev, 1).unwrap();
        assert!(encode_workspace(pylon, 0).is_err());
        assert!(encode_workspace(pylon, 127).is_ok());
        assert!(encode_workspace(pylon, 128).is_err());
    }

    #[test]
    fn conv_index_exhaustion_boundaries() {
        let pylon = encode_pylon(Env::Dev, 1).unwrap();
        let workspace = encode_workspace(pylon, 1).unwrap();
        assert!(encode_conversation(workspace, 0).is_err());
        assert!(encode_conversation(workspace, 1023).is_ok());
        assert!(encode_conversation(workspace, 1024).is_err());
    }

    #[test]
    fn type_bit_distinguishes_pylon_from_client() {
        let pylon = encode_pylon(Env::Dev, 1).unwrap();
        let client = encode_client(Env::Dev, 1).unwrap();
        assert!(is_pylon_id(pylon.raw()));
        assert!(!is_pylon_id(client.raw()));
    }

    #[test]
    fn scenario_register_pylon_matches_spec_example() {
        // register{pylonId: (2<<5)|0|1=65, ...}
        let pylon = encode_pylon(Env::Dev, 1).unwrap();
        assert_eq!(pylon.raw(), 65);
    }
}
