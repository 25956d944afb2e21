//! [`SamplerProgram`] (spec §3): an ordered list of layers plus a program
//! number. Layers are evaluated linearly on each note-on — with SFZ-scale
//! programs (tens to low hundreds of regions) this is cheap enough that
//! the spec explicitly accepts the O(layers) scan (§4.6).

use super::layer::LayerHandle;

#[derive(Debug, Clone, Default)]
pub struct SamplerProgram {
    pub prog_no: u32,
    pub name: String,
    pub layers: Vec<LayerHandle>,
}

impl SamplerProgram {
    pub fn new(prog_no: u32, name: impl Into<String>) -> Self {
        Self { prog_no, name: name.into(), layers: Vec::new() }
    }

    /// The note range `[lo, hi]` any layer in this program reserves as a
    /// keyswitch (spec §6: `sw_lokey`/`sw_hikey`). `None` if no layer
    /// declares one.
    pub fn keyswitch_range(&self) -> Option<(u8, u8)> {
        let mut lo = u8::MAX;
        let mut hi = 0u8;
        let mut found = false;
        for layer in &self.layers {
            if let (Some(l), Some(h)) = (layer.sw_lokey, layer.sw_hikey) {
                lo = lo.min(l);
                hi = hi.max(h);
                found = true;
            }
        }
        found.then_some((lo, hi))
    }
}
