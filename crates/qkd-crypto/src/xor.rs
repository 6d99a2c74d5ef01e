//! The `xor` crypto scheme: a running XOR accumulator. Cheap, and
//! intentionally not cryptographically strong — it exists for pipelines that
//! only need link-layer integrity checking against accidental corruption,
//! not an adversarial attacker.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XorContext {
    acc: Vec<u8>,
}

impl XorContext {
    pub fn new(init_key: &[u8]) -> Self {
        XorContext {
            acc: init_key.to_vec(),
        }
    }

    fn fold(acc: &mut Vec<u8>, data: &[u8]) {
        if data.len() > acc.len() {
            acc.resize(data.len(), 0);
        }
        for (a, b) in acc.iter_mut().zip(data.iter()) {
            *a ^= b;
        }
    }

    pub fn add(&mut self, data: &[u8]) {
        Self::fold(&mut self.acc, data);
    }

    pub fn add_context(&mut self, other: &XorContext) {
        let other_state = other.acc.clone();
        Self::fold(&mut self.acc, &other_state);
    }

    pub fn finalize(&self, final_key: &[u8]) -> Vec<u8> {
        let mut tag = self.acc.clone();
        Self::fold(&mut tag, final_key);
        tag
    }

    pub fn state(&self) -> Vec<u8> {
        self.acc.clone()
    }

    pub fn set_state(&mut self, bytes: &[u8]) {
        self.acc = bytes.to_vec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_is_its_own_inverse() {
        let mut ctx = XorContext::new(&[0, 0, 0, 0]);
        ctx.add(&[1, 2, 3, 4]);
        ctx.add(&[1, 2, 3, 4]);
        assert_eq!(ctx.state(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn grows_to_fit_longer_input() {
        let mut ctx = XorContext::new(&[0xff]);
        ctx.add(&[0, 0, 0]);
        assert_eq!(ctx.state(), vec![0xff, 0, 0]);
    }
}
