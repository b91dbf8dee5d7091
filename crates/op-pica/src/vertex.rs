//! Shader output vertices and their host-upload form

use bytemuck::{Pod, Zeroable};
use op_core::Float24;
use op_shader::AttributeBuffer;

use crate::regs::Regs;

/// Output semantic slots named by `vs_output_attributes`
pub mod semantic {
    pub const POSITION_X: u32 = 0;
    pub const QUATERNION_X: u32 = 4;
    pub const COLOR_R: u32 = 8;
    pub const TEXCOORD0_U: u32 = 12;
    pub const TEXCOORD1_U: u32 = 14;
    pub const TEXCOORD0_W: u32 = 16;
    pub const VIEW_X: u32 = 18;
    pub const TEXCOORD2_U: u32 = 22;
    /// Number of addressable slots
    pub const NUM_SLOTS: usize = 24;
    pub const INVALID: u32 = 31;
}

/// A vertex as produced by the vertex shader, after semantic mapping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputVertex {
    pub pos: [Float24; 4],
    pub quat: [Float24; 4],
    pub color: [Float24; 4],
    pub tc0: [Float24; 2],
    pub tc1: [Float24; 2],
    pub tc0_w: Float24,
    pub view: [Float24; 3],
    pub tc2: [Float24; 2],
}

impl Default for OutputVertex {
    fn default() -> Self {
        Self::from_slots(&[Float24::ZERO; semantic::NUM_SLOTS])
    }
}

impl OutputVertex {
    fn from_slots(s: &[Float24; semantic::NUM_SLOTS]) -> Self {
        Self {
            pos: [s[0], s[1], s[2], s[3]],
            quat: [s[4], s[5], s[6], s[7]],
            color: [s[8], s[9], s[10], s[11]],
            tc0: [s[12], s[13]],
            tc1: [s[14], s[15]],
            tc0_w: s[16],
            view: [s[18], s[19], s[20]],
            tc2: [s[22], s[23]],
        }
    }

    /// Map compacted shader outputs to vertex semantics.
    ///
    /// Slots no output maps to read as 1.0. Colors are replaced by their
    /// absolute value clamped to 1.0 before interpolation.
    pub fn from_attribute_buffer(regs: &Regs, output: &AttributeBuffer) -> Self {
        let mut slots = [Float24::ONE; semantic::NUM_SLOTS];

        let total = regs.vs_output_total();
        for (i, attr) in output.attr.iter().enumerate().take(total) {
            for (comp, semantic) in regs.vs_output_map(i).into_iter().enumerate() {
                match slots.get_mut(semantic as usize) {
                    Some(slot) => *slot = attr[comp],
                    None if semantic == semantic::INVALID => {}
                    None => tracing::error!("Invalid output semantic {}", semantic),
                }
            }
        }

        let mut vertex = Self::from_slots(&slots);
        for c in &mut vertex.color {
            let abs = c.to_f32().abs();
            // NaN clamps to 1.0 as well
            *c = Float24::from_f32(if abs < 1.0 { abs } else { 1.0 });
        }
        vertex
    }
}

/// Vertex layout uploaded to the host GPU
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct HardwareVertex {
    pub position: [f32; 4],
    pub color: [f32; 4],
    pub tex_coord0: [f32; 2],
    pub tex_coord1: [f32; 2],
    pub tex_coord2: [f32; 2],
    pub tex_coord0_w: f32,
    pub normquat: [f32; 4],
    pub view: [f32; 3],
}

fn to_f32<const N: usize>(v: [Float24; N]) -> [f32; N] {
    v.map(Float24::to_f32)
}

impl HardwareVertex {
    pub fn new(v: &OutputVertex, flip_quaternion: bool) -> Self {
        let mut normquat = to_f32(v.quat);
        if flip_quaternion {
            normquat = normquat.map(|c| -c);
        }
        Self {
            position: to_f32(v.pos),
            color: to_f32(v.color),
            tex_coord0: to_f32(v.tc0),
            tex_coord1: to_f32(v.tc1),
            tex_coord2: to_f32(v.tc2),
            tex_coord0_w: v.tc0_w.to_f32(),
            normquat,
            view: to_f32(v.view),
        }
    }
}

/// Whether interpolating from `a` to `b` would take the long way round
pub fn are_quaternions_opposite(a: &[Float24; 4], b: &[Float24; 4]) -> bool {
    let dot: f32 = a
        .iter()
        .zip(b)
        .map(|(x, y)| x.to_f32() * y.to_f32())
        .sum();
    dot < 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::id;

    fn f(v: f32) -> Float24 {
        Float24::from_f32(v)
    }

    fn map(x: u32, y: u32, z: u32, w: u32) -> u32 {
        x | (y << 8) | (z << 16) | (w << 24)
    }

    #[test]
    fn test_hardware_vertex_layout() {
        assert_eq!(std::mem::size_of::<HardwareVertex>(), 22 * 4);
        assert_eq!(std::mem::offset_of!(HardwareVertex, color), 16);
        assert_eq!(std::mem::offset_of!(HardwareVertex, tex_coord0_w), 56);
        assert_eq!(std::mem::offset_of!(HardwareVertex, normquat), 60);
        assert_eq!(std::mem::offset_of!(HardwareVertex, view), 76);
    }

    #[test]
    fn test_semantic_mapping() {
        let mut regs = Regs::new();
        regs.set(id::VS_OUTPUT_TOTAL, 2);
        regs.set(id::VS_OUTPUT_ATTRIBUTES, map(0, 1, 2, 3));
        // o1 -> color r, g, b and an unmapped w
        regs.set(id::VS_OUTPUT_ATTRIBUTES + 1, map(8, 9, 10, semantic::INVALID));

        let mut output = AttributeBuffer::default();
        output.attr[0] = [f(1.0), f(2.0), f(3.0), f(4.0)];
        output.attr[1] = [f(-0.5), f(2.0), f(f32::NAN), f(0.0)];

        let v = OutputVertex::from_attribute_buffer(&regs, &output);
        assert_eq!(v.pos, [f(1.0), f(2.0), f(3.0), f(4.0)]);
        assert_eq!(v.color, [f(0.5), f(1.0), f(1.0), f(1.0)]);
        // Unmapped slots read as one
        assert_eq!(v.quat, [f(1.0); 4]);
        assert_eq!(v.tc0_w, f(1.0));
    }

    #[test]
    fn test_quaternion_flip() {
        let a = [f(1.0), f(0.0), f(0.0), f(0.0)];
        let b = [f(-1.0), f(0.0), f(0.0), f(0.0)];
        assert!(are_quaternions_opposite(&a, &b));
        assert!(!are_quaternions_opposite(&a, &a));

        let v = OutputVertex {
            quat: [f(0.5), f(-0.5), f(0.0), f(1.0)],
            ..Default::default()
        };
        assert_eq!(HardwareVertex::new(&v, true).normquat, [-0.5, 0.5, -0.0, -1.0]);
        assert_eq!(HardwareVertex::new(&v, false).normquat, [0.5, -0.5, 0.0, 1.0]);
    }
}
