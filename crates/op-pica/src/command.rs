//! PICA command list decoding
//!
//! A command list is a sequence of `[parameter, header, extra parameters...]`
//! entries, each padded to an 8-byte boundary. Every parameter becomes one
//! register write.

/// Decoded command header word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub reg: u32,
    /// Byte-enable mask applied to every write of the command
    pub mask: u32,
    /// Number of parameters following the header
    pub extra: u32,
    /// Extra parameters go to consecutive registers instead of the same one
    pub consecutive: bool,
}

impl CommandHeader {
    pub fn decode(raw: u32) -> Self {
        Self {
            reg: raw & 0xFFFF,
            mask: (raw >> 16) & 0xF,
            extra: (raw >> 20) & 0xFF,
            consecutive: raw >> 31 != 0,
        }
    }

    pub fn encode(self) -> u32 {
        (self.reg & 0xFFFF)
            | ((self.mask & 0xF) << 16)
            | ((self.extra & 0xFF) << 20)
            | ((self.consecutive as u32) << 31)
    }
}

/// One register write produced by a command list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    pub reg: u32,
    pub value: u32,
    pub mask: u32,
}

/// Decode a command list into register writes.
///
/// Decoding stops at the first truncated command; the writes decoded so far
/// are returned.
pub fn decode_command_list(list: &[u32]) -> Vec<RegisterWrite> {
    let mut writes = Vec::new();
    let mut pos = 0;

    while pos < list.len() {
        let Some(&[value, raw_header]) = list[pos..].first_chunk::<2>() else {
            tracing::error!("Command list truncated at word {}", pos);
            break;
        };
        let header = CommandHeader::decode(raw_header);
        pos += 2;

        let extra = header.extra as usize;
        if pos + extra > list.len() {
            tracing::error!(
                "Command for register 0x{:03x} wants {} parameters, {} left",
                header.reg,
                extra,
                list.len() - pos
            );
            break;
        }

        writes.push(RegisterWrite {
            reg: header.reg,
            value,
            mask: header.mask,
        });
        for (i, &value) in list[pos..pos + extra].iter().enumerate() {
            let reg = if header.consecutive {
                header.reg + i as u32 + 1
            } else {
                header.reg
            };
            writes.push(RegisterWrite {
                reg,
                value,
                mask: header.mask,
            });
        }
        pos += extra;

        // Entries are 8-byte aligned
        pos += pos % 2;
    }

    writes
}

/// Command list encoder used by tests and trace tooling
#[derive(Debug, Default, Clone)]
pub struct CommandListBuilder {
    words: Vec<u32>,
}

impl CommandListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `value` to `reg` with all bytes enabled
    pub fn write(&mut self, reg: u32, value: u32) -> &mut Self {
        self.write_masked(reg, value, 0xF)
    }

    pub fn write_masked(&mut self, reg: u32, value: u32, mask: u32) -> &mut Self {
        self.push(reg, mask, false, &[value])
    }

    /// Write `values` to `reg`, `reg + 1`, ...
    pub fn write_consecutive(&mut self, reg: u32, values: &[u32]) -> &mut Self {
        self.push(reg, 0xF, true, values)
    }

    /// Write every value in `values` to the same register
    pub fn write_repeated(&mut self, reg: u32, values: &[u32]) -> &mut Self {
        self.push(reg, 0xF, false, values)
    }

    fn push(&mut self, reg: u32, mask: u32, consecutive: bool, values: &[u32]) -> &mut Self {
        // The extra-parameter count is 8 bits wide
        for (n, chunk) in values.chunks(256).enumerate() {
            let header = CommandHeader {
                reg: if consecutive { reg + n as u32 * 256 } else { reg },
                mask,
                extra: chunk.len() as u32 - 1,
                consecutive,
            };
            self.words.push(chunk[0]);
            self.words.push(header.encode());
            self.words.extend_from_slice(&chunk[1..]);
            if self.words.len() % 2 != 0 {
                self.words.push(0);
            }
        }
        self
    }

    pub fn finish(&self) -> Vec<u32> {
        self.words.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_fields() {
        let header = CommandHeader::decode(0x8037_0103);
        assert_eq!(header.reg, 0x103);
        assert_eq!(header.mask, 0x7);
        assert_eq!(header.extra, 0x3);
        assert!(header.consecutive);
        assert_eq!(header.encode(), 0x8037_0103);
    }

    #[test]
    fn test_single_writes_are_padded() {
        let list = [0x1111, 0x000F_0103, 0x2222, 0x0003_0104];
        let writes = decode_command_list(&list);
        assert_eq!(
            writes,
            vec![
                RegisterWrite { reg: 0x103, value: 0x1111, mask: 0xF },
                RegisterWrite { reg: 0x104, value: 0x2222, mask: 0x3 },
            ]
        );
    }

    #[test]
    fn test_consecutive_and_repeated() {
        // Three consecutive writes starting at 0x48, then two to the same port
        let list = [
            1, 0x802F_0048, 2, 3, // already 8-byte aligned
            7, 0x001F_00E8, 8, 0, // padded
            9, 0x000F_0010,
        ];
        let writes = decode_command_list(&list);
        let regs: Vec<_> = writes.iter().map(|w| (w.reg, w.value)).collect();
        assert_eq!(
            regs,
            vec![(0x48, 1), (0x49, 2), (0x4A, 3), (0xE8, 7), (0xE8, 8), (0x10, 9)]
        );
    }

    #[test]
    fn test_truncated_list() {
        // Header claims two extra parameters but only one follows
        let list = [5, 0x000F_0103, 0x1, 0x002F_0104, 6];
        let writes = decode_command_list(&list);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].reg, 0x103);

        assert!(decode_command_list(&[1]).is_empty());
    }

    #[test]
    fn test_builder_matches_decoder() {
        let list = CommandListBuilder::new()
            .write(0x103, 0xAABBCCDD)
            .write_masked(0x104, 0x10, 0x2)
            .write_consecutive(0x48, &[1, 2, 3])
            .write_repeated(0xE8, &[4, 5])
            .finish();
        assert_eq!(list.len() % 2, 0);

        let writes = decode_command_list(&list);
        let regs: Vec<_> = writes.iter().map(|w| (w.reg, w.value, w.mask)).collect();
        assert_eq!(
            regs,
            vec![
                (0x103, 0xAABBCCDD, 0xF),
                (0x104, 0x10, 0x2),
                (0x48, 1, 0xF),
                (0x49, 2, 0xF),
                (0x4A, 3, 0xF),
                (0xE8, 4, 0xF),
                (0xE8, 5, 0xF),
            ]
        );
    }
}
