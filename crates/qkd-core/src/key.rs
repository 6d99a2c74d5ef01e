use crate::buffer::{BufferReader, BufferWriter};
use crate::error::{QkdError, Result};
use crate::types::{KeyId, KeyState};

/// A distilled key record as it is framed on the wire and held in memory
/// between pipeline stages.
///
/// The crypto contexts that travel alongside a key (`ctx_in`/`ctx_out` in the
/// stage framework) are represented here purely as scheme strings —
/// `scheme_in`/`scheme_out` — since a scheme string already carries any
/// accumulated state via its trailing `:STATE_HEX` field. Reconstructing a
/// live `CryptoContext` from a scheme string is `qkd-crypto`'s job.
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    pub id: KeyId,
    pub state: KeyState,
    pub disclosed_bits: u64,
    pub qber: f64,
    pub scheme_in: String,
    pub scheme_out: String,
    pub data: Vec<u8>,
}

impl Key {
    pub fn new(id: KeyId, data: Vec<u8>) -> Self {
        Key {
            id,
            state: KeyState::Other,
            disclosed_bits: 0,
            qber: 0.0,
            scheme_in: "null".to_string(),
            scheme_out: "null".to_string(),
            data,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_null(&self) -> bool {
        self.id.is_null()
    }

    /// Byte-exact wire encoding: id, state, disclosed_bits, qber, scheme_in,
    /// scheme_out, size, payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = BufferWriter::new();
        w.push_u32(self.id.0);
        w.push_u8(self.state.as_u8());
        w.push_u64(self.disclosed_bits);
        w.push_f64(self.qber);
        w.push_str(&self.scheme_in)?;
        w.push_str(&self.scheme_out)?;
        w.push_u64(self.data.len() as u64);
        let mut bytes = w.into_vec();
        bytes.extend_from_slice(&self.data);
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = BufferReader::new(bytes);
        let id = KeyId(r.pop_u32()?);
        let state = KeyState::from_u8(r.pop_u8()?)?;
        let disclosed_bits = r.pop_u64()?;
        let qber = r.pop_f64()?;
        let scheme_in = r.pop_str()?;
        let scheme_out = r.pop_str()?;
        let size = r.pop_u64()? as usize;
        if r.remaining() != size {
            return Err(QkdError::SizeMismatch);
        }
        let data = bytes[bytes.len() - r.remaining()..].to_vec();
        Ok(Key {
            id,
            state,
            disclosed_bits,
            qber,
            scheme_in,
            scheme_out,
            data,
        })
    }
}
