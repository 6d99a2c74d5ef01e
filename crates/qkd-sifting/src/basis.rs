//! Basis extraction, merging, and bit derivation for the sifting stage.
//!
//! A quantum table byte carries two detector-click events, one per nibble
//! (high nibble first). Each nibble has one bit per detector: bits 0-1 are
//! the rectilinear pair (H/V), bits 2-3 are the diagonal pair (D/A).

/// The measurement basis inferred from a single detector-click event.
/// `Invalid` covers both "no detector clicked" and "clicked in both bases",
/// neither of which yields a usable bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Basis {
    Invalid = 0,
    Rectilinear = 1,
    Diagonal = 2,
}

impl Basis {
    pub fn from_tag(tag: u8) -> Basis {
        match tag {
            1 => Basis::Rectilinear,
            2 => Basis::Diagonal,
            _ => Basis::Invalid,
        }
    }

    pub fn to_tag(self) -> u8 {
        self as u8
    }
}

/// Parity (popcount mod 2) of every possible byte value, used to decide
/// whether an event's click pattern determines a bit outright or needs a
/// coin flip.
const fn parity_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let v = i as u8;
        let mut p = 0u8;
        let mut b = 0;
        while b < 8 {
            p ^= (v >> b) & 1;
            b += 1;
        }
        table[i] = p;
        i += 1;
    }
    table
}

pub const PARITY: [u8; 256] = parity_table();

/// Split a quantum-table byte stream into its individual detector-click
/// nibble events, high nibble first.
pub fn extract_events(bytes: &[u8]) -> Vec<u8> {
    let mut events = Vec::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        events.push(byte >> 4);
        events.push(byte & 0x0F);
    }
    events
}

pub fn measurement_basis(event: u8) -> Basis {
    let rect = event & 0x3 != 0;
    let diag = event & 0xC != 0;
    match (rect, diag) {
        (true, false) => Basis::Rectilinear,
        (false, true) => Basis::Diagonal,
        _ => Basis::Invalid,
    }
}

pub fn extract_bases(bytes: &[u8]) -> Vec<Basis> {
    extract_events(bytes).into_iter().map(measurement_basis).collect()
}

/// Keep only the positions where both sides used the same basis; everything
/// else becomes `Invalid` and is dropped before bit accumulation.
pub fn merge_bases(mine: &[Basis], theirs: &[Basis]) -> Vec<Basis> {
    mine.iter()
        .zip(theirs.iter())
        .map(|(a, b)| if a == b { *a } else { Basis::Invalid })
        .collect()
}

/// Pack basis tags 4-to-a-byte, 2 bits each, most-significant slot first.
pub fn pack_basis_table(bases: &[Basis]) -> Vec<u8> {
    let mut out = vec![0u8; (bases.len() + 3) / 4];
    for (i, b) in bases.iter().enumerate() {
        let byte_idx = i / 4;
        let slot = i % 4;
        let shift = 6 - 2 * slot;
        out[byte_idx] |= b.to_tag() << shift;
    }
    out
}

pub fn unpack_basis_table(bytes: &[u8], count: usize) -> Vec<Basis> {
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let byte_idx = i / 4;
        let slot = i % 4;
        let shift = 6 - 2 * slot;
        let tag = (bytes[byte_idx] >> shift) & 0x3;
        out.push(Basis::from_tag(tag));
    }
    out
}

/// Derive a bit from a retained event. A click pattern with odd parity
/// fully determines the bit; an even-parity pattern is genuinely ambiguous
/// and the bit is drawn at random instead. This departs from a textbook
/// BB84 simulator (which would derive every retained bit directly from the
/// click pattern) but matches the reference protocol's own behavior.
pub fn derive_bit(event: u8, rng: &mut impl rand::Rng) -> bool {
    if PARITY[event as usize] == 1 {
        (event & 0x5) != 0
    } else {
        rng.gen_bool(0.5)
    }
}

pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut out = vec![0u8; (bits.len() + 7) / 8];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            out[i / 8] |= 1 << (7 - (i % 8));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn rect_click_gives_rectilinear_basis() {
        assert_eq!(measurement_basis(0b0001), Basis::Rectilinear);
        assert_eq!(measurement_basis(0b0010), Basis::Rectilinear);
    }

    #[test]
    fn diag_click_gives_diagonal_basis() {
        assert_eq!(measurement_basis(0b0100), Basis::Diagonal);
        assert_eq!(measurement_basis(0b1000), Basis::Diagonal);
    }

    #[test]
    fn both_or_neither_is_invalid() {
        assert_eq!(measurement_basis(0b0000), Basis::Invalid);
        assert_eq!(measurement_basis(0b0101), Basis::Invalid);
    }

    #[test]
    fn basis_table_packing_round_trips() {
        let bases = vec![
            Basis::Rectilinear,
            Basis::Diagonal,
            Basis::Invalid,
            Basis::Rectilinear,
            Basis::Diagonal,
        ];
        let packed = pack_basis_table(&bases);
        let unpacked = unpack_basis_table(&packed, bases.len());
        assert_eq!(bases, unpacked);
    }

    #[test]
    fn merge_discards_mismatches() {
        let mine = vec![Basis::Rectilinear, Basis::Diagonal, Basis::Rectilinear];
        let theirs = vec![Basis::Rectilinear, Basis::Rectilinear, Basis::Rectilinear];
        let merged = merge_bases(&mine, &theirs);
        assert_eq!(
            merged,
            vec![Basis::Rectilinear, Basis::Invalid, Basis::Rectilinear]
        );
    }

    #[test]
    fn odd_parity_event_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(1);
        // 0b0001 has odd parity (one bit set).
        let a = derive_bit(0b0001, &mut rng);
        let mut rng2 = StdRng::seed_from_u64(99);
        let b = derive_bit(0b0001, &mut rng2);
        assert_eq!(a, b);
    }

    #[test]
    fn pack_bits_round_trip_size() {
        let bits = vec![true, false, true, true, false, false, false, true, true];
        let bytes = pack_bits(&bits);
        assert_eq!(bytes.len(), 2);
        assert_eq!(bytes[0], 0b1011_0001);
    }
}
