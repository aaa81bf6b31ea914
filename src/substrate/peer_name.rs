// Peer Name - 48-bit node identity
//
// Written in MAC address form ("02:1a:2b:3c:4d:5e"), the form the mesh uses
// to identify routers on the wire and in configuration.

use super::SubstrateError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const OCTETS: usize = 6;

/// Unique identifier of a peer on the mesh
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerName(u64);

impl PeerName {
    /// Build from the low 48 bits of `value`
    pub fn from_u64(value: u64) -> Self {
        Self(value & 0xFFFF_FFFF_FFFF)
    }

    /// Generate a random locally-administered peer name
    pub fn random() -> Self {
        let mut bytes = [0u8; OCTETS];
        rand::thread_rng().fill(&mut bytes);
        // Locally administered, unicast
        bytes[0] = (bytes[0] | 0x02) & 0xFE;
        Self::from_octets(bytes)
    }

    /// Build from six octets
    pub fn from_octets(octets: [u8; OCTETS]) -> Self {
        let mut value = 0u64;
        for octet in octets {
            value = (value << 8) | octet as u64;
        }
        Self(value)
    }

    /// Get the six octets, most significant first
    pub fn octets(&self) -> [u8; OCTETS] {
        let mut out = [0u8; OCTETS];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = (self.0 >> (8 * (OCTETS - 1 - i))) as u8;
        }
        out
    }

    /// Get the raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl FromStr for PeerName {
    type Err = SubstrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SubstrateError::InvalidPeerName(s.to_string());

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != OCTETS {
            return Err(invalid());
        }

        let mut octets = [0u8; OCTETS];
        for (slot, part) in octets.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(invalid());
            }
            let byte = hex::decode(part).map_err(|_| invalid())?;
            *slot = byte[0];
        }

        Ok(Self::from_octets(octets))
    }
}

impl fmt::Display for PeerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let octets = self.octets();
        let parts: Vec<String> = octets.iter().map(|b| hex::encode([*b])).collect();
        write!(f, "{}", parts.join(":"))
    }
}
