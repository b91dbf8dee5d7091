//! oxidized-pica - PICA200 GPU trace player
//!
//! Replays a recorded register/command trace through the GPU core and
//! reports what the backend was asked to do.

mod trace;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use op_core::Config;
use op_pica::GpuContext;

use trace::Trace;

#[derive(Parser, Debug)]
#[command(name = "oxidized-pica", version, about = "Replay a PICA200 GPU trace")]
struct Args {
    /// Trace file to replay
    trace: PathBuf,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Shader engine override ("jit" or "interpreter")
    #[arg(long, value_name = "NAME")]
    engine: Option<String>,

    /// Upload raw vertex arrays instead of shading on the CPU
    #[arg(long, action = clap::ArgAction::SetTrue)]
    hw_vertex_arrays: bool,

    /// Log the disassembly of every vertex program
    #[arg(long, action = clap::ArgAction::SetTrue)]
    dump_shaders: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::load().context("failed to load config")?,
    };
    if let Some(engine) = args.engine {
        config.gpu.shader_engine = engine;
    }
    config.gpu.hw_vertex_arrays |= args.hw_vertex_arrays;
    config.debug.dump_shaders |= args.dump_shaders;

    op_core::logging::init(&config.debug);
    tracing::info!("Starting oxidized-pica trace player");

    let text = std::fs::read_to_string(&args.trace)
        .with_context(|| format!("failed to read trace {}", args.trace.display()))?;
    let trace = Trace::parse(&text).context("failed to parse trace")?;
    let memory = trace.build_memory().context("failed to map trace memory")?;

    let mut gpu = GpuContext::new(&config, Box::new(memory));
    trace.replay(&mut gpu);

    let stats = gpu.stats();
    println!("engine:             {}", gpu.engine_name());
    println!("backend:            {}", gpu.backend().name());
    println!("register writes:    {}", stats.register_writes);
    println!("draws:              {} ({} indexed)", stats.draws, stats.indexed_draws);
    println!("vertices shaded:    {}", stats.vertices_shaded);
    println!("vertex cache hits:  {}", stats.vertex_cache_hits);
    println!("triangles:          {}", stats.triangles);
    println!("vertex array bytes: {}", stats.vertex_array_bytes);
    println!("GS stage dropped:   {}", stats.geometry_shader_draws);
    println!("skipped draws:      {}", stats.skipped_draws);
    Ok(())
}
