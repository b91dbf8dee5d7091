//! Text GPU traces
//!
//! One operation per line; `#` starts a comment. Numbers are decimal or
//! `0x`-prefixed hex.
//!
//! ```text
//! mem <addr> <hex bytes>        guest memory contents
//! reg <id> <value> [mask]       register write, mask defaults to 0xF
//! cmd <word> <word> ...         command list
//! ```
//!
//! Memory lines are applied before any register or command operation.

use op_core::GpuError;
use op_pica::{FlatMemory, GpuContext};

/// Register or command list operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceOp {
    Reg { id: u32, value: u32, mask: u32 },
    Cmd(Vec<u32>),
}

/// A parsed trace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trace {
    pub memory: Vec<(u32, Vec<u8>)>,
    pub ops: Vec<TraceOp>,
}

fn invalid(line: usize, msg: impl std::fmt::Display) -> GpuError {
    GpuError::InvalidTrace(format!("line {}: {}", line, msg))
}

fn parse_number(line: usize, token: &str) -> Result<u32, GpuError> {
    let parsed = match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => token.parse(),
    };
    parsed.map_err(|_| invalid(line, format_args!("bad number '{}'", token)))
}

fn parse_hex_bytes(line: usize, text: &str) -> Result<Vec<u8>, GpuError> {
    let digits: Vec<u8> = text.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(invalid(line, "odd number of hex digits"));
    }
    digits
        .chunks_exact(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| invalid(line, "bad hex byte"))
        })
        .collect()
}

impl Trace {
    pub fn parse(text: &str) -> Result<Self, GpuError> {
        let mut trace = Self::default();

        for (n, raw) in text.lines().enumerate() {
            let line = n + 1;
            let content = raw.split('#').next().unwrap_or("").trim();
            let mut tokens = content.split_whitespace();
            let Some(keyword) = tokens.next() else {
                continue;
            };

            match keyword {
                "mem" => {
                    let addr = tokens
                        .next()
                        .ok_or_else(|| invalid(line, "missing address"))?;
                    let addr = parse_number(line, addr)?;
                    let bytes = parse_hex_bytes(line, &tokens.collect::<String>())?;
                    trace.memory.push((addr, bytes));
                }
                "reg" => {
                    let args = tokens
                        .map(|t| parse_number(line, t))
                        .collect::<Result<Vec<_>, _>>()?;
                    let (id, value, mask) = match args[..] {
                        [id, value] => (id, value, 0xF),
                        [id, value, mask] => (id, value, mask),
                        _ => return Err(invalid(line, "expected: reg <id> <value> [mask]")),
                    };
                    trace.ops.push(TraceOp::Reg { id, value, mask });
                }
                "cmd" => {
                    let words = tokens
                        .map(|t| parse_number(line, t))
                        .collect::<Result<Vec<_>, _>>()?;
                    trace.ops.push(TraceOp::Cmd(words));
                }
                other => return Err(invalid(line, format_args!("unknown operation '{}'", other))),
            }
        }

        Ok(trace)
    }

    /// Guest memory spanning every `mem` block
    pub fn build_memory(&self) -> Result<FlatMemory, GpuError> {
        let start = self.memory.iter().map(|(addr, _)| *addr).min().unwrap_or(0);
        let end = self
            .memory
            .iter()
            .map(|(addr, bytes)| *addr as u64 + bytes.len() as u64)
            .max()
            .unwrap_or(0);

        let size = end.saturating_sub(start as u64);
        if end > 1 << 32 {
            return Err(GpuError::InvalidTrace(format!(
                "memory block ends past the 32-bit address space (0x{:x})",
                end
            )));
        }

        let mut memory = FlatMemory::new(start, size as usize);
        for (addr, bytes) in &self.memory {
            memory.write(*addr, bytes)?;
        }
        Ok(memory)
    }

    /// Apply every operation to `gpu`
    pub fn replay(&self, gpu: &mut GpuContext) {
        for op in &self.ops {
            match op {
                TraceOp::Reg { id, value, mask } => gpu.write_reg(*id, *value, *mask),
                TraceOp::Cmd(words) => gpu.process_command_list(words),
            }
        }
    }
}
