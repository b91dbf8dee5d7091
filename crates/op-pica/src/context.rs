//! GPU context (register writes and draw processing)

use std::collections::HashSet;
use std::sync::Arc;

use op_core::Config;
use op_shader::bytecode::disassemble;
use op_shader::fixup::ProgramFixupTable;
use op_shader::regs::{offset, SHADER_REG_COUNT};
use op_shader::setup::NUM_INT_UNIFORMS;
use op_shader::{create_engine, AttributeBuffer, ShaderEngine, UniformSetup, UnitState};

use crate::backend::{create_backend, GraphicsBackend};
use crate::command::decode_command_list;
use crate::loader::VertexLoader;
use crate::memory::GuestMemory;
use crate::primitive::PrimitiveAssembler;
use crate::rasterizer::{RasterizerAccelerated, MAX_DRAW_VERTICES};
use crate::regs::{id, is_data_port, NUM_REGS};
use crate::state::PicaState;
use crate::vertex::OutputVertex;

/// Number of recently shaded indices reused within an indexed draw
const VERTEX_CACHE_SIZE: usize = 16;

/// Shader unit addressed by a register write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShaderUnit {
    Vertex,
    Geometry,
}

impl ShaderUnit {
    fn base(self) -> u32 {
        match self {
            Self::Vertex => id::VS_BASE,
            Self::Geometry => id::GS_BASE,
        }
    }

    /// Unit owning `reg`, with the offset inside its block
    fn for_register(reg: u32) -> Option<(Self, usize)> {
        [Self::Vertex, Self::Geometry].into_iter().find_map(|unit| {
            let rel = reg.wrapping_sub(unit.base()) as usize;
            (rel < SHADER_REG_COUNT).then_some((unit, rel))
        })
    }
}

/// Counters collected while processing draws
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStats {
    /// Register writes accepted
    pub register_writes: u64,
    /// Draw triggers processed
    pub draws: u64,
    /// Of which indexed
    pub indexed_draws: u64,
    /// Vertices run through the shader engine
    pub vertices_shaded: u64,
    /// Shaded vertices served from the vertex cache
    pub vertex_cache_hits: u64,
    /// Triangles handed to the backend
    pub triangles: u64,
    /// Bytes uploaded as raw vertex arrays
    pub vertex_array_bytes: u64,
    /// Draws whose geometry shader stage was dropped
    pub geometry_shader_draws: u64,
    /// Draws rejected for exceeding the vertex limit
    pub skipped_draws: u64,
}

/// The GPU: register state plus everything that acts on it
pub struct GpuContext {
    /// Register-derived state
    pub state: PicaState,
    /// Vertex shader engine
    engine: Box<dyn ShaderEngine>,
    /// Host-independent renderer half
    rasterizer: RasterizerAccelerated,
    /// Host renderer
    backend: Box<dyn GraphicsBackend>,
    /// Guest memory for vertex and index fetch
    memory: Box<dyn GuestMemory>,
    /// Triangle assembly for CPU-shaded draws
    assembler: PrimitiveAssembler<OutputVertex>,
    /// Upload vertex arrays instead of shading on the CPU
    hw_vertex_arrays: bool,
    /// Stride alignment of uploaded vertex arrays
    stride_alignment: u32,
    /// Log the disassembly of each new vertex program
    dump_shaders: bool,
    /// Program hashes already dumped
    dumped_programs: HashSet<u64>,
    stats: DrawStats,
}

impl GpuContext {
    /// Create a context with the backend named in `config`
    pub fn new(config: &Config, memory: Box<dyn GuestMemory>) -> Self {
        let backend = create_backend(&config.gpu.backend);
        Self::with_backend(config, memory, backend)
    }

    /// Create a context with a specific backend
    pub fn with_backend(
        config: &Config,
        memory: Box<dyn GuestMemory>,
        backend: Box<dyn GraphicsBackend>,
    ) -> Self {
        let engine = create_engine(&config.gpu.shader_engine, config.gpu.shader_step_limit);
        tracing::info!(
            "GPU context: {} shader engine, {} backend, {}x resolution",
            engine.name(),
            backend.name(),
            config.gpu.resolution_scale
        );

        let fixups = ProgramFixupTable::from(&config.gpu.shader_fixups[..]);
        if !fixups.is_empty() {
            tracing::info!("{} shader program fixups configured", fixups.len());
        }
        let state = PicaState::with_fixups(Arc::new(fixups));
        let mut rasterizer = RasterizerAccelerated::new(config.gpu.resolution_scale);
        rasterizer.sync_entire_state(&state);

        Self {
            state,
            engine,
            rasterizer,
            backend,
            memory,
            assembler: PrimitiveAssembler::default(),
            hw_vertex_arrays: config.gpu.hw_vertex_arrays,
            stride_alignment: config.gpu.stride_alignment.max(1),
            dump_shaders: config.debug.dump_shaders,
            dumped_programs: HashSet::new(),
            stats: DrawStats::default(),
        }
    }

    pub fn stats(&self) -> DrawStats {
        self.stats
    }

    pub fn rasterizer(&self) -> &RasterizerAccelerated {
        &self.rasterizer
    }

    pub fn backend(&self) -> &dyn GraphicsBackend {
        &*self.backend
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Execute a command list
    pub fn process_command_list(&mut self, words: &[u32]) {
        for write in decode_command_list(words) {
            self.write_reg(write.reg, write.value, write.mask);
        }
    }

    /// Write a register under a 4-bit byte-enable mask and apply its side
    /// effects
    pub fn write_reg(&mut self, reg: u32, value: u32, mask: u32) {
        let Some((old, new)) = self.state.regs.write_masked(reg, value, mask) else {
            tracing::error!("Write to invalid register 0x{:03x} (limit 0x{:03x})", reg, NUM_REGS);
            return;
        };
        self.stats.register_writes += 1;
        if old != new || is_data_port(reg) {
            self.state.dirty_regs.set(reg);
        }

        let PicaState {
            regs,
            luts,
            default_attributes,
            ..
        } = &mut self.state;

        match reg {
            id::TRIANGLE_TOPOLOGY => self.assembler.reconfigure(regs.triangle_topology()),
            id::RESTART_PRIMITIVE => self.assembler.reset(),
            id::DEFAULT_ATTRIB_INDEX => default_attributes.reset_queue(),
            id::DEFAULT_ATTRIB_DATA..=id::DEFAULT_ATTRIB_DATA_END => {
                default_attributes.write(regs, new);
            }
            id::LIGHTING_LUT_DATA..=id::LIGHTING_LUT_DATA_END => luts.write_lighting(regs, new),
            id::FOG_LUT_DATA..=id::FOG_LUT_DATA_END => luts.write_fog(regs, new),
            id::PROCTEX_LUT_DATA..=id::PROCTEX_LUT_DATA_END => luts.write_proctex(regs, new),
            id::TRIGGER_DRAW => self.draw(false),
            id::TRIGGER_DRAW_INDEXED => self.draw(true),
            _ => {
                if let Some((unit, rel)) = ShaderUnit::for_register(reg) {
                    self.write_shader_reg(unit, rel, new);
                }
            }
        }
    }

    fn write_shader_reg(&mut self, unit: ShaderUnit, rel: usize, value: u32) {
        let base = unit.base();
        let PicaState { regs, vs, gs, .. } = &mut self.state;
        let setup = match unit {
            ShaderUnit::Vertex => vs,
            ShaderUnit::Geometry => gs,
        };

        match rel {
            offset::BOOL_UNIFORMS => setup.write_uniform_bool_reg(value),
            rel if (offset::INT_UNIFORMS..offset::INT_UNIFORMS + NUM_INT_UNIFORMS).contains(&rel) => {
                setup.write_uniform_int_reg(rel - offset::INT_UNIFORMS, value.to_le_bytes());
            }
            offset::UNIFORM_SETUP => setup.reset_uniform_queue(),
            offset::UNIFORM_DATA..=offset::UNIFORM_DATA_END => {
                let setup_reg = base + offset::UNIFORM_SETUP as u32;
                let mut uniform_setup = UniformSetup::from_raw(regs.get(setup_reg));
                if setup.write_uniform_float_reg(&mut uniform_setup, value).is_some() {
                    let raw = regs.get(setup_reg);
                    regs.set(setup_reg, (raw & !0xFF) | uniform_setup.to_raw() & 0xFF);
                }
            }
            offset::PROGRAM_DATA..=offset::PROGRAM_DATA_END => {
                let offset_reg = base + offset::PROGRAM_OFFSET as u32;
                let target = regs.get(offset_reg);
                setup.update_program_code(target as usize, value);
                regs.set(offset_reg, target.wrapping_add(1));
            }
            offset::SWIZZLE_DATA..=offset::SWIZZLE_DATA_END => {
                let offset_reg = base + offset::SWIZZLE_OFFSET as u32;
                let target = regs.get(offset_reg);
                setup.update_swizzle_data(target as usize, value);
                regs.set(offset_reg, target.wrapping_add(1));
            }
            _ => {}
        }
    }

    fn draw(&mut self, is_indexed: bool) {
        let num_vertices = self.state.regs.num_vertices();
        if num_vertices > MAX_DRAW_VERTICES {
            tracing::error!(
                "Draw of {} vertices exceeds the {} vertex limit, skipping",
                num_vertices,
                MAX_DRAW_VERTICES
            );
            self.stats.skipped_draws += 1;
            return;
        }

        if self.state.regs.use_gs() {
            tracing::warn!(
                "Draw of {} vertices dropped its geometry shader stage, output is vertex shader only",
                num_vertices
            );
            self.stats.geometry_shader_draws += 1;
        }

        let entry_point = self.state.regs.vs().main_offset();
        self.engine.setup_batch(&mut self.state.vs, entry_point);
        if self.dump_shaders {
            self.dump_vertex_shader();
        }

        self.stats.draws += 1;
        if is_indexed {
            self.stats.indexed_draws += 1;
        }
        tracing::debug!(
            "Draw: {} vertices, indexed={}, topology={:?}",
            num_vertices,
            is_indexed,
            self.assembler.topology()
        );

        if self.hw_vertex_arrays {
            self.draw_vertex_array(is_indexed);
        } else {
            self.draw_shaded(is_indexed);
        }
    }

    /// Upload the raw vertex arrays and let the host shade them
    fn draw_vertex_array(&mut self, is_indexed: bool) {
        let memory = &*self.memory;
        let info = self.rasterizer.analyze_vertex_array(
            &self.state.regs,
            memory,
            is_indexed,
            self.stride_alignment,
        );
        let data = self.rasterizer.setup_vertex_array(
            &self.state.regs,
            memory,
            &info,
            self.stride_alignment,
        );

        self.rasterizer.sync_draw_uniforms(&mut self.state);
        self.rasterizer.upload_dirty(&mut *self.backend, &self.state.luts);
        self.backend.draw_vertex_array(&info, &data, is_indexed);
        self.stats.vertex_array_bytes += data.len() as u64;
    }

    /// Shade every vertex on the CPU and assemble triangles
    fn draw_shaded(&mut self, is_indexed: bool) {
        let regs = &self.state.regs;
        let memory = &*self.memory;
        let vs_regs = regs.vs();
        let loader = VertexLoader::new(regs);
        let base = regs.vertex_attrib_base();
        let num_vertices = regs.num_vertices();

        let index_array = regs.index_array();
        let index_size = if index_array.u16_indices { 2 } else { 1 };
        let indices = if is_indexed {
            let addr = base.wrapping_add(index_array.offset);
            match memory.read(addr, num_vertices as usize * index_size) {
                Some(bytes) => Some(bytes),
                None => {
                    tracing::error!("Index buffer at 0x{:08x} is not readable, skipping draw", addr);
                    return;
                }
            }
        } else {
            None
        };

        let mut cache: [Option<(u32, OutputVertex)>; VERTEX_CACHE_SIZE] = [None; VERTEX_CACHE_SIZE];
        let mut cache_next = 0;
        let mut input = AttributeBuffer::default();
        let rasterizer = &mut self.rasterizer;

        for i in 0..num_vertices as usize {
            let vertex = match indices {
                Some(bytes) if index_size == 2 => {
                    u16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]) as u32
                }
                Some(bytes) => bytes[i] as u32,
                None => regs.vertex_offset().wrapping_add(i as u32),
            };

            let cached = indices.and_then(|_| {
                cache
                    .iter()
                    .flatten()
                    .find(|(index, _)| *index == vertex)
                    .map(|(_, output)| *output)
            });
            let output = match cached {
                Some(output) => {
                    self.stats.vertex_cache_hits += 1;
                    output
                }
                None => {
                    loader.load_vertex(
                        memory,
                        base,
                        vertex,
                        &mut input,
                        &self.state.default_attributes.attrs,
                    );
                    let mut unit = UnitState::default();
                    unit.load_input(&vs_regs, &input);
                    self.engine.run(&self.state.vs, &mut unit, None);

                    let mut shaded = AttributeBuffer::default();
                    unit.write_output(&vs_regs, &mut shaded);
                    let output = OutputVertex::from_attribute_buffer(regs, &shaded);
                    self.stats.vertices_shaded += 1;

                    if is_indexed {
                        cache[cache_next] = Some((vertex, output));
                        cache_next = (cache_next + 1) % VERTEX_CACHE_SIZE;
                    }
                    output
                }
            };

            self.assembler
                .submit_vertex(output, |v0, v1, v2| rasterizer.add_triangle(v0, v1, v2));
        }

        self.rasterizer.sync_draw_uniforms(&mut self.state);
        self.rasterizer.upload_dirty(&mut *self.backend, &self.state.luts);
        self.stats.triangles += self.rasterizer.flush_triangles(&mut *self.backend) as u64;
    }

    fn dump_vertex_shader(&mut self) {
        let vs = &mut self.state.vs;
        let hash = vs.program_code_hash();
        if !self.dumped_programs.insert(hash) {
            return;
        }
        let code = &vs.program_code()[..vs.biggest_program_size()];
        let swizzle = &vs.swizzle_data()[..vs.biggest_swizzle_size()];
        tracing::info!(
            "Vertex shader {:016x} (fixup: {}):\n{}",
            hash,
            vs.has_fixup(),
            disassemble(code, swizzle)
        );
    }
}
