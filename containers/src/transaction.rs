use serde::{Deserialize, Serialize};

use crate::hash::{hash256, Hash32};

/// Reference to an output of a prior transaction.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash32,
    pub index: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxInput {
    pub previous_output: OutPoint,
    pub script: Vec<u8>,
    pub sequence: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub script: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// Canonical identifier: double SHA-256 over the serialized form.
    pub fn hash(&self) -> Hash32 {
        hash256(&self.to_bytes())
    }

    /// Deterministic serialization used for identity and size accounting.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.serialized_size());
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&(self.inputs.len() as u64).to_le_bytes());

        for input in &self.inputs {
            bytes.extend_from_slice(input.previous_output.hash.as_bytes());
            bytes.extend_from_slice(&input.previous_output.index.to_le_bytes());
            bytes.extend_from_slice(&(input.script.len() as u64).to_le_bytes());
            bytes.extend_from_slice(&input.script);
            bytes.extend_from_slice(&input.sequence.to_le_bytes());
        }

        bytes.extend_from_slice(&(self.outputs.len() as u64).to_le_bytes());

        for output in &self.outputs {
            bytes.extend_from_slice(&output.value.to_le_bytes());
            bytes.extend_from_slice(&(output.script.len() as u64).to_le_bytes());
            bytes.extend_from_slice(&output.script);
        }

        bytes.extend_from_slice(&self.lock_time.to_le_bytes());
        bytes
    }

    pub fn serialized_size(&self) -> usize {
        let inputs: usize = self
            .inputs
            .iter()
            .map(|input| 32 + 4 + 8 + input.script.len() + 4)
            .sum();
        let outputs: usize = self
            .outputs
            .iter()
            .map(|output| 8 + 8 + output.script.len())
            .sum();

        4 + 8 + inputs + 8 + outputs + 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint {
                    hash: hash256(b"prior"),
                    index: 0,
                },
                script: vec![0x51],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOutput {
                value: 5_000,
                script: vec![0x76, 0xa9],
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn hash_is_stable() {
        assert_eq!(sample().hash(), sample().hash());
    }

    #[test]
    fn hash_tracks_content() {
        let mut other = sample();
        other.lock_time = 1;
        assert_ne!(sample().hash(), other.hash());
    }

    #[test]
    fn size_matches_serialization() {
        let tx = sample();
        assert_eq!(tx.serialized_size(), tx.to_bytes().len());
    }
}
