//! The `null` crypto scheme: no authentication at all. Used before a link
//! has negotiated a real scheme, and by stages that want to forward a key
//! without attaching any tag.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NullContext;

impl NullContext {
    pub fn new() -> Self {
        Self
    }

    pub fn add(&mut self, _data: &[u8]) {}

    pub fn add_context(&mut self, _other: &NullContext) {}

    pub fn finalize(&self, _final_key: &[u8]) -> Vec<u8> {
        Vec::new()
    }

    pub fn state(&self) -> Vec<u8> {
        Vec::new()
    }

    pub fn set_state(&mut self, _bytes: &[u8]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_empty_tag() {
        let mut ctx = NullContext::new();
        ctx.add(b"anything");
        assert!(ctx.finalize(b"pad").is_empty());
    }
}
