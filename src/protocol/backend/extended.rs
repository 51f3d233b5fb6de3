//! Extended query protocol backend messages.

use crate::error::{Error, Result};
use crate::protocol::codec::{read_u16, read_u32};
use crate::protocol::types::Oid;

/// Check that a message with no body really has no body.
pub fn expect_empty(name: &str, payload: &[u8]) -> Result<()> {
    if payload.is_empty() {
        Ok(())
    } else {
        Err(Error::Protocol(format!(
            "{name}: expected empty payload, got {} bytes",
            payload.len()
        )))
    }
}

/// ParameterDescription message - describes parameters for a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescription {
    param_oids: Vec<Oid>,
}

impl ParameterDescription {
    /// Parse a ParameterDescription message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (num_params, mut data) = read_u16(payload)?;

        let mut param_oids = Vec::with_capacity(num_params as usize);
        for _ in 0..num_params {
            let (oid, rest) = read_u32(data)?;
            param_oids.push(oid);
            data = rest;
        }
        if !data.is_empty() {
            return Err(Error::Protocol(format!(
                "ParameterDescription: {} trailing bytes",
                data.len()
            )));
        }

        Ok(Self { param_oids })
    }

    /// Get parameter type OIDs.
    pub fn oids(&self) -> &[Oid] {
        &self.param_oids
    }

    pub fn into_oids(self) -> Vec<Oid> {
        self.param_oids
    }
}
