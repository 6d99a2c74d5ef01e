use crate::constants::{DEFAULT_KEY_ID_ADD, DEFAULT_KEY_ID_SHIFT, NULL_KEY_ID};
use crate::error::{QkdError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Lifecycle state of a key as it moves through the pipeline.
///
/// Ordering mirrors the reference protocol's own enumeration so that the
/// numeric value written on the wire is stable across peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum KeyState {
    Other = 0,
    Raw = 1,
    Sifted = 2,
    Corrected = 3,
    Uncorrected = 4,
    Confirmed = 5,
    Unconfirmed = 6,
    Amplified = 7,
    Authenticated = 8,
    Disclosed = 9,
}

impl KeyState {
    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => KeyState::Other,
            1 => KeyState::Raw,
            2 => KeyState::Sifted,
            3 => KeyState::Corrected,
            4 => KeyState::Uncorrected,
            5 => KeyState::Confirmed,
            6 => KeyState::Unconfirmed,
            7 => KeyState::Amplified,
            8 => KeyState::Authenticated,
            9 => KeyState::Disclosed,
            other => return Err(QkdError::Other(format!("unknown key state byte {other}"))),
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyState::Other => "other",
            KeyState::Raw => "raw",
            KeyState::Sifted => "sifted",
            KeyState::Corrected => "corrected",
            KeyState::Uncorrected => "uncorrected",
            KeyState::Confirmed => "confirmed",
            KeyState::Unconfirmed => "unconfirmed",
            KeyState::Amplified => "amplified",
            KeyState::Authenticated => "authenticated",
            KeyState::Disclosed => "disclosed",
        };
        write!(f, "{s}")
    }
}

/// Newtype over the 32-bit key identifier carried in every key frame and
/// every peer message. `KeyId(0)` is the reserved "null" id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyId(pub u32);

impl KeyId {
    pub const NULL: KeyId = KeyId(NULL_KEY_ID);

    pub fn is_null(self) -> bool {
        self.0 == NULL_KEY_ID
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for KeyId {
    fn from(v: u32) -> Self {
        KeyId(v)
    }
}

/// Process-global monotonic key id generator.
///
/// `next() = ((counter << shift) + add)`, which lets two cooperating
/// processes on the same machine (e.g. a module and its mirrored stream
/// consumer) carve out disjoint id spaces by picking different `add` values,
/// or interleave ids from multiple generators by varying `shift`.
pub struct KeyIdCounter {
    counter: AtomicU32,
    shift: u32,
    add: u32,
}

impl KeyIdCounter {
    pub fn new(shift: u32, add: u32) -> Self {
        Self {
            counter: AtomicU32::new(0),
            shift,
            add,
        }
    }

    /// Allocate the next id. Never returns [`KeyId::NULL`]: the internal
    /// counter starts at 1 so the reserved id 0 is never emitted.
    pub fn next(&self) -> KeyId {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        KeyId((n << self.shift) + self.add)
    }

    pub fn reset(&self) {
        self.counter.store(0, Ordering::SeqCst);
    }
}

impl Default for KeyIdCounter {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_ID_SHIFT, DEFAULT_KEY_ID_ADD)
    }
}

/// The parsed form of a crypto scheme string: `ALG[-BITS][:INIT_KEY[:STATE]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemeSpec {
    pub algorithm: Algorithm,
    pub bits: Option<u32>,
    pub init_key: Option<Vec<u8>>,
    pub state: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Null,
    Xor,
    EvHash,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Algorithm::Null => "null",
            Algorithm::Xor => "xor",
            Algorithm::EvHash => "evhash",
        };
        write!(f, "{s}")
    }
}

impl SchemeSpec {
    pub const NULL: SchemeSpec = SchemeSpec {
        algorithm: Algorithm::Null,
        bits: None,
        init_key: None,
        state: None,
    };

    /// Parse `ALG[-BITS][:INIT_KEY_HEX[:STATE_HEX]]`.
    pub fn parse(s: &str) -> Result<Self> {
        let mut colon_parts = s.splitn(3, ':');
        let head = colon_parts.next().unwrap_or_default();
        let init_key_hex = colon_parts.next();
        let state_hex = colon_parts.next();

        let mut dash_parts = head.splitn(2, '-');
        let alg_str = dash_parts.next().unwrap_or_default();
        let bits_str = dash_parts.next();

        let algorithm = match alg_str {
            "null" => Algorithm::Null,
            "xor" => Algorithm::Xor,
            "evhash" => Algorithm::EvHash,
            other => return Err(QkdError::UnknownAlgorithm(other.to_string())),
        };

        let bits = match (algorithm, bits_str) {
            (Algorithm::EvHash, Some(b)) => {
                let n: u32 = b
                    .parse()
                    .map_err(|_| QkdError::MalformedScheme(s.to_string()))?;
                if !crate::constants::EVHASH_VALID_BITS.contains(&n) {
                    return Err(QkdError::UnsupportedEvHashWidth(n));
                }
                Some(n)
            }
            (Algorithm::EvHash, None) => Some(128),
            (_, None) => None,
            (_, Some(_)) => return Err(QkdError::MalformedScheme(s.to_string())),
        };

        let init_key = init_key_hex.map(hex::decode).transpose()?;
        let state = state_hex.map(hex::decode).transpose()?;

        Ok(SchemeSpec {
            algorithm,
            bits,
            init_key,
            state,
        })
    }
}

impl fmt::Display for SchemeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.algorithm)?;
        if let Some(bits) = self.bits {
            if self.algorithm == Algorithm::EvHash {
                write!(f, "-{bits}")?;
            }
        }
        if let Some(k) = &self.init_key {
            write!(f, ":{}", hex::encode(k))?;
            if let Some(st) = &self.state {
                write!(f, ":{}", hex::encode(st))?;
            }
        }
        Ok(())
    }
}
