//! End-to-end draws through `GpuContext`: command lists in, backend calls out.

use std::cell::RefCell;
use std::rc::Rc;

use op_core::Config;
use op_pica::command::CommandListBuilder;
use op_pica::lut::LutState;
use op_pica::regs::id;
use op_pica::uniforms::UniformBlocks;
use op_pica::vertex::HardwareVertex;
use op_pica::{
    FlatMemory, GpuContext, GraphicsBackend, GuestMemory, UniformBlockDirty, VertexArrayInfo,
};
use op_shader::assembler::{Dst, ShaderBuilder, Src};
use op_shader::regs::offset;

const VERTEX_BASE: u32 = 0x2000_0000;
const INDEX_OFFSET: u32 = 0x400;

#[derive(Default)]
struct Recording {
    triangles: Vec<HardwareVertex>,
    arrays: Vec<(VertexArrayInfo, Vec<u8>)>,
    uniform_uploads: Vec<(UniformBlocks, UniformBlockDirty)>,
    lut_uploads: Vec<(u32, UniformBlockDirty)>,
}

struct RecordingBackend(Rc<RefCell<Recording>>);

impl GraphicsBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn upload_uniforms(&mut self, blocks: &UniformBlocks, dirty: UniformBlockDirty) {
        self.0.borrow_mut().uniform_uploads.push((*blocks, dirty));
    }

    fn upload_luts(&mut self, _luts: &LutState, lighting: u32, dirty: UniformBlockDirty) {
        self.0.borrow_mut().lut_uploads.push((lighting, dirty));
    }

    fn draw_triangles(&mut self, vertices: &[HardwareVertex]) {
        self.0.borrow_mut().triangles.extend_from_slice(vertices);
    }

    fn draw_vertex_array(&mut self, info: &VertexArrayInfo, data: &[u8], _is_indexed: bool) {
        self.0.borrow_mut().arrays.push((*info, data.to_vec()));
    }
}

fn vertex_bytes(vertices: &[([f32; 4], [f32; 4])]) -> Vec<u8> {
    vertices
        .iter()
        .flat_map(|(pos, quat)| pos.iter().chain(quat.iter()))
        .flat_map(|c| c.to_le_bytes())
        .collect()
}

fn memory() -> FlatMemory {
    let mut memory = FlatMemory::new(VERTEX_BASE, 0x1000);
    let vertices = vertex_bytes(&[
        ([0.0, 0.0, 0.5, 1.0], [1.0, 0.0, 0.0, 0.0]),
        ([1.0, 0.0, 0.5, 1.0], [-1.0, 0.0, 0.0, 0.0]),
        ([0.0, 1.0, 0.5, 1.0], [0.0, 1.0, 0.0, 0.0]),
        ([1.0, 1.0, 0.5, 1.0], [-0.5, 0.0, 0.0, 0.5]),
    ]);
    memory.write(VERTEX_BASE, &vertices).unwrap();
    let indices: [u16; 6] = [0, 1, 2, 2, 1, 3];
    memory
        .write(VERTEX_BASE + INDEX_OFFSET, bytemuck::cast_slice(&indices))
        .unwrap();
    memory
}

/// Pass-through vertex program with position in o0 and quaternion in o1
fn setup_commands(builder: &mut CommandListBuilder) {
    let mut program = ShaderBuilder::new();
    program.mov(Dst::output(0), Src::input(0)).unwrap();
    program.mov(Dst::output(1), Src::input(1)).unwrap();
    program.end();
    let program = program.finish().unwrap();

    let vs = |o: usize| id::VS_BASE + o as u32;
    builder
        .write(vs(offset::PROGRAM_OFFSET), 0)
        .write_repeated(vs(offset::PROGRAM_DATA), &program.code)
        .write(vs(offset::SWIZZLE_OFFSET), 0)
        .write_repeated(vs(offset::SWIZZLE_DATA), &program.swizzle)
        .write(vs(offset::MAIN_OFFSET), 0)
        // Two inputs: attribute 0 -> v0, attribute 1 -> v1
        .write(vs(offset::INPUT_BUFFER_CONFIG), 1)
        .write(vs(offset::INPUT_REGISTER_MAP_LOW), 0x10)
        .write(vs(offset::OUTPUT_MASK), 0b11);

    builder
        .write(id::VS_OUTPUT_TOTAL, 2)
        .write(id::VS_OUTPUT_ATTRIBUTES, 0x0302_0100)
        .write(id::VS_OUTPUT_ATTRIBUTES + 1, 0x0706_0504);

    // Two float4 attributes interleaved in one 32-byte array
    builder
        .write(id::VERTEX_ATTRIB_BASE, VERTEX_BASE >> 3)
        .write(id::VERTEX_ATTRIB_FORMAT_LOW, 0xFF)
        .write(id::VERTEX_ATTRIB_FORMAT_HIGH, 1 << 28)
        .write(id::ATTRIBUTE_LOADER0, 0)
        .write(id::ATTRIBUTE_LOADER0 + 1, 0x10)
        .write(id::ATTRIBUTE_LOADER0 + 2, (2 << 28) | (32 << 16));
}

fn context(hw_vertex_arrays: bool) -> (GpuContext, Rc<RefCell<Recording>>) {
    let mut config = Config::default();
    config.gpu.shader_engine = "interpreter".to_string();
    config.gpu.hw_vertex_arrays = hw_vertex_arrays;
    let recording = Rc::new(RefCell::new(Recording::default()));
    let backend = Box::new(RecordingBackend(recording.clone()));
    (
        GpuContext::with_backend(&config, Box::new(memory()), backend),
        recording,
    )
}

#[test]
fn test_non_indexed_draw() {
    let (mut gpu, recording) = context(false);
    let mut builder = CommandListBuilder::new();
    setup_commands(&mut builder);
    builder
        .write(id::NUM_VERTICES, 3)
        .write(id::VERTEX_OFFSET, 0)
        .write(id::TRIGGER_DRAW, 1);
    gpu.process_command_list(&builder.finish());

    let recording = recording.borrow();
    assert_eq!(recording.triangles.len(), 3);
    assert_eq!(recording.triangles[0].position, [0.0, 0.0, 0.5, 1.0]);
    assert_eq!(recording.triangles[1].position, [1.0, 0.0, 0.5, 1.0]);
    // v1 points away from v0 and is flipped, v2 is orthogonal and is not
    assert_eq!(recording.triangles[1].normquat[0], 1.0);
    assert_eq!(recording.triangles[2].normquat, [0.0, 1.0, 0.0, 0.0]);

    let stats = gpu.stats();
    assert_eq!(stats.draws, 1);
    assert_eq!(stats.vertices_shaded, 3);
    assert_eq!(stats.triangles, 1);
    assert!(!gpu.state.dirty_regs.any());
}

#[test]
fn test_indexed_draw_uses_vertex_cache() {
    let (mut gpu, recording) = context(false);
    let mut builder = CommandListBuilder::new();
    setup_commands(&mut builder);
    builder
        .write(id::INDEX_ARRAY, INDEX_OFFSET | (1 << 31))
        .write(id::NUM_VERTICES, 6)
        .write(id::TRIGGER_DRAW_INDEXED, 1);
    gpu.process_command_list(&builder.finish());

    let stats = gpu.stats();
    assert_eq!(stats.indexed_draws, 1);
    assert_eq!(stats.vertices_shaded, 4);
    assert_eq!(stats.vertex_cache_hits, 2);
    assert_eq!(stats.triangles, 2);

    let recording = recording.borrow();
    // Second triangle is (2, 1, 3): quaternions compare against vertex 2
    assert_eq!(recording.triangles[3].position, [0.0, 1.0, 0.5, 1.0]);
    assert_eq!(recording.triangles[5].normquat, [-0.5, 0.0, 0.0, 0.5]);
}

#[test]
fn test_vertex_array_draw() {
    let (mut gpu, recording) = context(true);
    let mut builder = CommandListBuilder::new();
    setup_commands(&mut builder);
    builder
        .write(id::INDEX_ARRAY, INDEX_OFFSET | (1 << 31))
        .write(id::NUM_VERTICES, 6)
        .write(id::TRIGGER_DRAW_INDEXED, 1);
    gpu.process_command_list(&builder.finish());

    let recording = recording.borrow();
    assert!(recording.triangles.is_empty());
    let (info, data) = &recording.arrays[0];
    assert_eq!((info.vertex_min, info.vertex_max), (0, 3));
    assert_eq!(info.vs_input_size, 4 * 32);
    assert_eq!(Some(data.as_slice()), memory().read(VERTEX_BASE, 128));
    assert_eq!(gpu.stats().vertex_array_bytes, 128);
}

#[test]
fn test_uniform_uploads_follow_dirty_state() {
    let (mut gpu, recording) = context(false);
    let mut builder = CommandListBuilder::new();
    setup_commands(&mut builder);
    builder
        .write(id::VS_BASE + offset::UNIFORM_SETUP as u32, 0x8000_0000)
        .write_repeated(
            id::VS_BASE + offset::UNIFORM_DATA as u32,
            &[1.0f32.to_bits(), 0, 0, 0],
        )
        .write(id::FOG_LUT_OFFSET, 0)
        .write(id::FOG_LUT_DATA, 0xABCD)
        .write(id::NUM_VERTICES, 3)
        .write(id::TRIGGER_DRAW, 1);
    gpu.process_command_list(&builder.finish());

    {
        let recording = recording.borrow();
        let (blocks, dirty) = recording.uniform_uploads.last().unwrap();
        assert!(dirty.contains(UniformBlockDirty::VS_PICA));
        assert_eq!(blocks.vs_pica.f[0], [0.0, 0.0, 0.0, 1.0]);
        let (_, lut_dirty) = recording.lut_uploads.last().unwrap();
        assert!(lut_dirty.contains(UniformBlockDirty::FOG_LUT));
    }

    // A second draw with nothing changed uploads nothing
    let uploads = recording.borrow().uniform_uploads.len();
    gpu.write_reg(id::TRIGGER_DRAW, 1, 0xF);
    assert_eq!(recording.borrow().uniform_uploads.len(), uploads);
    assert_eq!(recording.borrow().triangles.len(), 6);
}
