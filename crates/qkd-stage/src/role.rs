use std::fmt;

/// Which side of a peer pair a stage instance is running as. Several stages
/// (sifting's basis merge, confirmation's mask draw, authentication's tag
/// split) behave asymmetrically between the two sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Alice,
    Bob,
}

impl Role {
    pub fn is_alice(self) -> bool {
        matches!(self, Role::Alice)
    }

    pub fn peer(self) -> Role {
        match self {
            Role::Alice => Role::Bob,
            Role::Bob => Role::Alice,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Alice => write!(f, "alice"),
            Role::Bob => write!(f, "bob"),
        }
    }
}
