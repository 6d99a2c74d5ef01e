//! Key-stream framing and the peer message envelope, both read/written
//! directly off an `AsyncRead`/`AsyncWrite` endpoint field by field — the key
//! frame is self-delimiting (every variable-length field carries its own
//! length prefix) so no outer length needs to be layered on top.

use qkd_core::error::{QkdError, Result};
use qkd_core::key::Key;
use qkd_core::types::{KeyId, KeyState};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub async fn write_key<W: AsyncWrite + Unpin>(w: &mut W, key: &Key) -> Result<()> {
    let bytes = key.encode()?;
    w.write_all(&bytes).await?;
    Ok(())
}

pub async fn read_key<R: AsyncRead + Unpin>(r: &mut R) -> Result<Key> {
    let id = r.read_u32().await.map_err(map_eof)?;
    let state = r.read_u8().await?;
    let disclosed_bits = r.read_u64().await?;
    let qber = r.read_f64().await?;
    let scheme_in = read_string(r).await?;
    let scheme_out = read_string(r).await?;
    let size = r.read_u64().await? as usize;
    let mut data = vec![0u8; size];
    r.read_exact(&mut data).await?;
    Ok(Key {
        id: KeyId(id),
        state: KeyState::from_u8(state)?,
        disclosed_bits,
        qber,
        scheme_in,
        scheme_out,
        data,
    })
}

async fn read_string<R: AsyncRead + Unpin>(r: &mut R) -> Result<String> {
    let len = r.read_u64().await? as usize;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes).await?;
    String::from_utf8(bytes).map_err(|e| QkdError::Other(e.to_string()))
}

fn map_eof(e: std::io::Error) -> QkdError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        QkdError::ConnectionClosed
    } else {
        QkdError::Io(e)
    }
}

/// A tagged, length-prefixed peer message, keyed by the key id it concerns.
/// Stages interpret `payload` according to their own schema (mask sets,
/// basis tables, tag shares, ...); the envelope only guarantees the
/// receiver can find the boundaries and route by key id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub key_id: KeyId,
    pub tag: u8,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(key_id: KeyId, tag: u8, payload: Vec<u8>) -> Self {
        Envelope { key_id, tag, payload }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(13 + self.payload.len());
        out.extend_from_slice(&self.key_id.0.to_be_bytes());
        out.push(self.tag);
        out.extend_from_slice(&(self.payload.len() as u64).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

pub async fn write_envelope<W: AsyncWrite + Unpin>(w: &mut W, env: &Envelope) -> Result<()> {
    w.write_all(&env.encode()).await?;
    Ok(())
}

pub async fn read_envelope<R: AsyncRead + Unpin>(r: &mut R) -> Result<Envelope> {
    let key_id = r.read_u32().await.map_err(map_eof)?;
    let tag = r.read_u8().await?;
    let len = r.read_u64().await? as usize;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await?;
    Ok(Envelope {
        key_id: KeyId(key_id),
        tag,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use qkd_core::types::KeyState;

    #[tokio::test]
    async fn key_round_trips_over_a_duplex_stream() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let mut key = Key::new(KeyId(9), vec![1, 2, 3]);
        key.state = KeyState::Sifted;
        key.qber = 0.01;
        write_key(&mut a, &key).await.unwrap();
        let back = read_key(&mut b).await.unwrap();
        assert_eq!(key, back);
    }

    #[tokio::test]
    async fn envelope_round_trips_over_a_duplex_stream() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let env = Envelope::new(KeyId(4), 7, vec![9, 9, 9]);
        write_envelope(&mut a, &env).await.unwrap();
        let back = read_envelope(&mut b).await.unwrap();
        assert_eq!(env, back);
    }

    #[tokio::test]
    async fn read_key_reports_connection_closed_on_clean_eof() {
        let (a, mut b) = tokio::io::duplex(4096);
        drop(a);
        let err = read_key(&mut b).await.unwrap_err();
        assert!(matches!(err, QkdError::ConnectionClosed));
    }
}
