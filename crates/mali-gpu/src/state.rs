//! GL-style per-context state.
//!
//! Most of this patches the persistent render-state template in place (see
//! `render_state`); the viewport/scissor/depth-range trio instead drives
//! lazily re-emitted PLBU commands, so those carry dirty flags that are
//! consumed exactly once per emission.

use bitflags::bitflags;

use crate::cmd::plbu;

/// GL draw modes, numbered as the hardware expects them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawMode {
    Points = 0,
    Lines = 1,
    LineLoop = 2,
    LineStrip = 3,
    Triangles = 4,
    TriangleStrip = 5,
    TriangleFan = 6,
}

impl DrawMode {
    pub fn hw(self) -> u32 {
        self as u32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrontFace {
    Ccw,
    Cw,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CullFace {
    Front,
    Back,
    FrontAndBack,
}

/// Hardware depth/alpha compare functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareFunc {
    Never = 0,
    Less = 1,
    Equal = 2,
    LessEqual = 3,
    Greater = 4,
    NotEqual = 5,
    GreaterEqual = 6,
    Always = 7,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendEquation {
    Add = 0,
    Subtract = 1,
    ReverseSubtract = 2,
    Min = 3,
    Max = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendFactor {
    Zero = 0,
    One = 1,
    SrcColor = 2,
    OneMinusSrcColor = 3,
    DstColor = 4,
    OneMinusDstColor = 5,
    SrcAlpha = 6,
    OneMinusSrcAlpha = 7,
    DstAlpha = 8,
    OneMinusDstAlpha = 9,
    ConstantColor = 10,
    OneMinusConstantColor = 11,
    ConstantAlpha = 12,
    OneMinusConstantAlpha = 13,
    SrcAlphaSaturate = 14,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ColorMask: u32 {
        const R = 1 << 0;
        const G = 1 << 1;
        const B = 1 << 2;
        const A = 1 << 3;
    }
}

bitflags! {
    /// PLBU state awaiting re-emission.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct Dirty: u32 {
        const VIEWPORT = 1 << 0;
        const SCISSOR = 1 << 1;
        const DEPTH = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scissor {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

#[derive(Clone, Debug)]
pub struct GlState {
    pub viewport: Viewport,
    pub scissor: Scissor,
    pub depth_near: f32,
    pub depth_far: f32,

    pub front_face: FrontFace,
    pub cull_face: Option<CullFace>,

    pub depth_test: bool,
    pub depth_func: CompareFunc,
    pub depth_mask: bool,

    pub blend: bool,
    pub blend_eq_rgb: BlendEquation,
    pub blend_eq_alpha: BlendEquation,
    pub blend_src_rgb: BlendFactor,
    pub blend_dst_rgb: BlendFactor,
    pub blend_src_alpha: BlendFactor,
    pub blend_dst_alpha: BlendFactor,

    pub alpha_func: CompareFunc,
    pub alpha_ref: f32,
    pub color_mask: ColorMask,
    pub polygon_offset: bool,
    pub polygon_offset_units: f32,

    dirty: Dirty,
}

impl GlState {
    /// Initial state for a surface of the given size, with everything
    /// marked dirty so the first draw emits the full PLBU state.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            viewport: Viewport {
                x: 0.0,
                y: 0.0,
                w: width as f32,
                h: height as f32,
            },
            scissor: Scissor {
                x: 0,
                y: 0,
                w: width,
                h: height,
            },
            depth_near: 0.0,
            depth_far: 1.0,
            front_face: FrontFace::Ccw,
            cull_face: None,
            depth_test: false,
            depth_func: CompareFunc::Less,
            depth_mask: true,
            blend: false,
            blend_eq_rgb: BlendEquation::Add,
            blend_eq_alpha: BlendEquation::Add,
            blend_src_rgb: BlendFactor::One,
            blend_dst_rgb: BlendFactor::Zero,
            blend_src_alpha: BlendFactor::One,
            blend_dst_alpha: BlendFactor::Zero,
            alpha_func: CompareFunc::Always,
            alpha_ref: 0.0,
            color_mask: ColorMask::all(),
            polygon_offset: false,
            polygon_offset_units: 0.0,
            dirty: Dirty::all(),
        }
    }

    pub fn set_viewport(&mut self, x: f32, y: f32, w: f32, h: f32) {
        self.viewport = Viewport { x, y, w, h };
        self.dirty |= Dirty::VIEWPORT;
    }

    pub fn set_scissor(&mut self, x: u32, y: u32, w: u32, h: u32) {
        self.scissor = Scissor { x, y, w, h };
        self.dirty |= Dirty::SCISSOR;
    }

    pub fn set_depth_range(&mut self, near: f32, far: f32) {
        self.depth_near = near;
        self.depth_far = far;
        self.dirty |= Dirty::DEPTH;
    }

    /// Consume the viewport dirty flag; true at most once per set.
    pub(crate) fn take_viewport_dirty(&mut self) -> bool {
        let dirty = self.dirty.contains(Dirty::VIEWPORT);
        self.dirty.remove(Dirty::VIEWPORT);
        dirty
    }

    pub(crate) fn take_scissor_dirty(&mut self) -> bool {
        let dirty = self.dirty.contains(Dirty::SCISSOR);
        self.dirty.remove(Dirty::SCISSOR);
        dirty
    }

    pub(crate) fn take_depth_dirty(&mut self) -> bool {
        let dirty = self.dirty.contains(Dirty::DEPTH);
        self.dirty.remove(Dirty::DEPTH);
        dirty
    }

    pub(crate) fn mark_depth_dirty(&mut self) {
        self.dirty |= Dirty::DEPTH;
    }

    /// Primitive-setup culling bits for the current winding/cull-face
    /// combination.
    pub(crate) fn cull_bits(&self) -> u32 {
        let Some(cull) = self.cull_face else { return 0 };
        let (cw, ccw) = (plbu::CULL_CW, plbu::CULL_CCW);
        match (cull, self.front_face) {
            (CullFace::Back, FrontFace::Ccw) => cw,
            (CullFace::Back, FrontFace::Cw) => ccw,
            (CullFace::Front, FrontFace::Ccw) => ccw,
            (CullFace::Front, FrontFace::Cw) => cw,
            (CullFace::FrontAndBack, _) => cw | ccw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_flags_are_consumed_once() {
        let mut state = GlState::new(640, 480);
        assert!(state.take_viewport_dirty());
        assert!(!state.take_viewport_dirty());

        state.set_viewport(0.0, 0.0, 64.0, 64.0);
        assert!(state.take_viewport_dirty());
        assert!(!state.take_viewport_dirty());
    }

    #[test]
    fn cull_bits_follow_winding() {
        let mut state = GlState::new(64, 64);
        assert_eq!(state.cull_bits(), 0);

        state.cull_face = Some(CullFace::Back);
        assert_eq!(state.cull_bits(), plbu::CULL_CW);

        state.front_face = FrontFace::Cw;
        assert_eq!(state.cull_bits(), plbu::CULL_CCW);

        state.cull_face = Some(CullFace::FrontAndBack);
        assert_eq!(state.cull_bits(), plbu::CULL_CW | plbu::CULL_CCW);
    }
}
