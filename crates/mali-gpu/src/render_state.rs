//! The fragment-processor render-state block.
//!
//! A fixed 0x40-byte record the PP reads per draw. Several words were never
//! fully reverse-engineered; those keep their observed power-on values and
//! are only ever patched in the documented bit ranges. Do not reinterpret
//! them.

use crate::program::{Program, VaryingMap};
use crate::state::{BlendEquation, BlendFactor, ColorMask, CompareFunc, GlState};

pub const RENDER_STATE_SIZE: u32 = 0x40;

/// One render-state record, word for word.
///
/// Field names follow the parts that are understood; `aux0`/`aux1` carry a
/// mix of known bit ranges and fixed unknowns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderState {
    pub blend_color_bg: u32,
    pub blend_color_ra: u32,
    pub alpha_blend: u32,
    pub depth_test: u32,
    pub depth_range: u32,
    pub stencil_front: u32,
    pub stencil_back: u32,
    pub stencil_test: u32,
    pub multi_sample: u32,
    pub shader_address: u32,
    pub varying_types: u32,
    pub uniforms_address: u32,
    pub textures_address: u32,
    pub aux0: u32,
    pub aux1: u32,
    pub varyings_address: u32,
}

impl Default for RenderState {
    /// Observed baseline values; the unknown bits must survive untouched.
    fn default() -> Self {
        Self {
            blend_color_bg: 0x0000_0000,
            blend_color_ra: 0x0000_0000,
            alpha_blend: 0xFC3B_1AD2,
            depth_test: 0x0000_003E,
            depth_range: 0xFFFF_0000,
            stencil_front: 0x0000_0007,
            stencil_back: 0x0000_0007,
            stencil_test: 0x0000_0007,
            multi_sample: 0x0000_F807,
            shader_address: 0x0000_0000,
            varying_types: 0x0000_0000,
            uniforms_address: 0x0000_0000,
            textures_address: 0x0000_0000,
            aux0: 0x0000_0300,
            aux1: 0x0000_2000,
            varyings_address: 0x0000_0000,
        }
    }
}

impl RenderState {
    pub fn encode_le(&self) -> [u8; RENDER_STATE_SIZE as usize] {
        let words = [
            self.blend_color_bg,
            self.blend_color_ra,
            self.alpha_blend,
            self.depth_test,
            self.depth_range,
            self.stencil_front,
            self.stencil_back,
            self.stencil_test,
            self.multi_sample,
            self.shader_address,
            self.varying_types,
            self.uniforms_address,
            self.textures_address,
            self.aux0,
            self.aux1,
            self.varyings_address,
        ];
        let mut out = [0u8; RENDER_STATE_SIZE as usize];
        for (i, w) in words.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
        out
    }

    /// Patch the blend word. Disabled blending restores the baseline value
    /// rather than encoding ONE/ZERO, to keep the unknown high bits exact.
    pub fn set_blend(
        &mut self,
        enabled: bool,
        eq_rgb: BlendEquation,
        eq_alpha: BlendEquation,
        src_rgb: BlendFactor,
        dst_rgb: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    ) {
        if !enabled {
            self.alpha_blend = RenderState::default().alpha_blend;
            return;
        }
        self.alpha_blend = 0xFC00_0000
            | (eq_rgb as u32)
            | ((eq_alpha as u32) << 3)
            | ((src_rgb as u32) << 6)
            | ((dst_rgb as u32) << 11)
            | ((src_alpha as u32) << 16)
            | ((dst_alpha as u32) << 20);
    }

    /// Depth word, bits [0] enable, [3:1] compare func, [4] write mask;
    /// bit 5 is a constant the hardware insists on.
    pub fn set_depth(&mut self, enabled: bool, func: CompareFunc, mask: bool) {
        self.depth_test = 0x20
            | u32::from(enabled)
            | ((func as u32) << 1)
            | (u32::from(mask) << 4);
    }

    /// Near/far as 16-bit fixed point halves of one word.
    pub fn set_depth_range(&mut self, near: f32, far: f32) {
        let fixed = |v: f32| (v.clamp(0.0, 1.0) * 65535.0) as u32;
        self.depth_range = (fixed(far) << 16) | fixed(near);
    }

    /// Alpha test func in bits [2:0], reference value byte in [15:8].
    pub fn set_alpha_func(&mut self, func: CompareFunc, reference: f32) {
        let byte = (reference.clamp(0.0, 1.0) * 255.0) as u32;
        self.stencil_test =
            (self.stencil_test & !0x0000_FF07) | (func as u32) | (byte << 8);
    }

    /// Channel mask nibble in multi_sample bits [15:12].
    pub fn set_color_mask(&mut self, mask: ColorMask) {
        self.multi_sample = (self.multi_sample & !0x0000_F000) | (mask.bits() << 12);
    }

    /// Polygon offset: enable bit 12 of aux1, units byte in [7:0].
    pub fn set_polygon_offset(&mut self, enabled: bool, units: f32) {
        let byte = (units.clamp(-128.0, 127.0) as i32 as u8) as u32;
        self.aux1 = (self.aux1 & !0x0000_10FF)
            | (u32::from(enabled) << 12)
            | if enabled { byte } else { 0 };
    }

    /// Mirror the PLBU-side GL state into the template patches.
    pub fn apply_gl_state(&mut self, state: &GlState) {
        self.set_blend(
            state.blend,
            state.blend_eq_rgb,
            state.blend_eq_alpha,
            state.blend_src_rgb,
            state.blend_dst_rgb,
            state.blend_src_alpha,
            state.blend_dst_alpha,
        );
        self.set_depth(state.depth_test, state.depth_func, state.depth_mask);
        self.set_depth_range(state.depth_near, state.depth_far);
        self.set_alpha_func(state.alpha_func, state.alpha_ref);
        self.set_color_mask(state.color_mask);
        self.set_polygon_offset(state.polygon_offset, state.polygon_offset_units);
    }
}

/// Shape class packed per varying slot: 3 bits derived from the slot's
/// entry size and count.
fn shape_class(entry_size: u32, entries: u32) -> u32 {
    match (entry_size, entries) {
        (4, 4) => 0,
        (4, 2) => 1,
        (2, 4) => 2,
        (2, 2) => 3,
        _ => unreachable!("varying map only produces 2/4 x 2/4 slots"),
    }
}

/// Build the per-draw render state for `program`, starting from the
/// context's patched template.
///
/// The varying-type packing is irregular on purpose: slots 0-9 occupy 3
/// bits each of `varying_types`, slot 10 splits between the top of that
/// word and bit 0 of `varyings_address`, and slot 11 lands in
/// `varyings_address` bits above that. The hardware wants exactly this.
pub fn render_state_for_draw(
    template: &RenderState,
    program: &Program,
    varyings_address: u32,
    uniforms_address: Option<(u32, u32)>,
    textures: Option<(u32, u32)>,
) -> RenderState {
    let mut rsw = *template;

    let first_instruction = program
        .fragment
        .fragment_parameters()
        .map(|p| p.first_instruction_size)
        .unwrap_or(0);
    rsw.shader_address = program.fragment_address | (first_instruction & 0x1F);

    rsw.varyings_address = varyings_address;
    apply_varying_map(&mut rsw, &program.varying_map);

    if let Some((address, size)) = uniforms_address {
        let words = (size / 4).max(1);
        rsw.uniforms_address = address | (words - 1);
        rsw.aux0 |= 0x80;
    }

    if let Some((address, count)) = textures {
        rsw.textures_address = address;
        rsw.aux0 |= count << 14;
    }

    rsw
}

fn apply_varying_map(rsw: &mut RenderState, map: &VaryingMap) {
    for (i, slot) in map.slots.iter().enumerate() {
        let class = shape_class(slot.entry_size, slot.entries);
        if i < 10 {
            rsw.varying_types |= class << (3 * i);
        } else if i == 10 {
            rsw.varying_types |= class << 30;
            rsw.varyings_address |= class >> 2;
        } else if i == 11 {
            rsw.varyings_address |= class << 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::VaryingSlot;

    #[test]
    fn default_block_encodes_the_baseline_words() {
        let bytes = RenderState::default().encode_le();
        assert_eq!(bytes.len(), 0x40);
        let word = |i: usize| u32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
        assert_eq!(word(2), 0xFC3B_1AD2);
        assert_eq!(word(4), 0xFFFF_0000);
        assert_eq!(word(8), 0x0000_F807);
        assert_eq!(word(14), 0x0000_2000);
    }

    #[test]
    fn depth_patch_toggles_only_its_bits() {
        let mut rsw = RenderState::default();
        rsw.set_depth(true, CompareFunc::LessEqual, true);
        assert_eq!(rsw.depth_test, 0x20 | 1 | (3 << 1) | (1 << 4));
        rsw.set_depth(false, CompareFunc::Always, true);
        assert_eq!(rsw.depth_test, 0x20 | (7 << 1) | (1 << 4));
    }

    #[test]
    fn color_mask_lives_in_the_multisample_nibble() {
        let mut rsw = RenderState::default();
        rsw.set_color_mask(ColorMask::R | ColorMask::B);
        assert_eq!(rsw.multi_sample, 0x0000_5807);
        rsw.set_color_mask(ColorMask::all());
        assert_eq!(rsw.multi_sample, 0x0000_F807);
    }

    #[test]
    fn disabling_blend_restores_the_baseline_word() {
        let mut rsw = RenderState::default();
        rsw.set_blend(
            true,
            BlendEquation::Add,
            BlendEquation::Add,
            BlendFactor::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha,
            BlendFactor::One,
            BlendFactor::Zero,
        );
        assert_ne!(rsw.alpha_blend, 0xFC3B_1AD2);
        rsw.set_blend(
            false,
            BlendEquation::Add,
            BlendEquation::Add,
            BlendFactor::One,
            BlendFactor::Zero,
            BlendFactor::One,
            BlendFactor::Zero,
        );
        assert_eq!(rsw.alpha_blend, 0xFC3B_1AD2);
    }

    #[test]
    fn varying_slots_10_and_11_spill_into_the_address_word() {
        let mut rsw = RenderState::default();
        let slots: Vec<VaryingSlot> = (0..12)
            .map(|i| VaryingSlot {
                offset: i * 8,
                entries: 2,
                entry_size: 2, // class 3 in every slot
            })
            .collect();
        let map = VaryingMap {
            slots,
            size: 96,
        };
        rsw.varyings_address = 0x1000_0040;
        apply_varying_map(&mut rsw, &map);

        // Slots 0-9: 3 bits each of class 3.
        for i in 0..10 {
            assert_eq!((rsw.varying_types >> (3 * i)) & 0x7, 3);
        }
        // Slot 10: low two class bits in [31:30], high bit in address bit 0.
        assert_eq!(rsw.varying_types >> 30, 3);
        assert_eq!(rsw.varyings_address & 1, 0);
        // Slot 11: class shifted into address bits [3:1].
        assert_eq!((rsw.varyings_address >> 1) & 0x7, 3);
        // Address bits above the quirk range are untouched.
        assert_eq!(rsw.varyings_address & !0xF, 0x1000_0040);
    }
}
