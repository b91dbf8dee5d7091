//! Triangle assembly from the vertex stream

use crate::regs::TriangleTopology;

/// Groups submitted vertices into triangles according to the topology
#[derive(Debug, Clone)]
pub struct PrimitiveAssembler<V> {
    topology: TriangleTopology,
    buffer: [Option<V>; 2],
    buffer_index: usize,
    strip_ready: bool,
    winding: bool,
}

impl<V> Default for PrimitiveAssembler<V> {
    fn default() -> Self {
        Self::new(TriangleTopology::List)
    }
}

impl<V> PrimitiveAssembler<V> {
    pub fn new(topology: TriangleTopology) -> Self {
        Self {
            topology,
            buffer: [None, None],
            buffer_index: 0,
            strip_ready: false,
            winding: false,
        }
    }

    pub fn topology(&self) -> TriangleTopology {
        self.topology
    }

    /// Restart assembly, dropping buffered vertices
    pub fn reset(&mut self) {
        self.buffer = [None, None];
        self.buffer_index = 0;
        self.strip_ready = false;
        self.winding = false;
    }

    pub fn reconfigure(&mut self, topology: TriangleTopology) {
        self.reset();
        self.topology = topology;
    }

    /// Reverse the winding of the next shader-topology triangle
    pub fn set_winding(&mut self) {
        self.winding = true;
    }
}

impl<V: Clone> PrimitiveAssembler<V> {
    /// Add a vertex, calling `triangle` for each completed triangle
    pub fn submit_vertex(&mut self, vtx: V, mut triangle: impl FnMut(&V, &V, &V)) {
        match self.topology {
            TriangleTopology::List | TriangleTopology::Shader => {
                if self.buffer_index < 2 {
                    self.buffer[self.buffer_index] = Some(vtx);
                    self.buffer_index += 1;
                    return;
                }
                self.buffer_index = 0;
                if let [Some(v0), Some(v1)] = &self.buffer {
                    if self.topology == TriangleTopology::Shader && self.winding {
                        triangle(v1, v0, &vtx);
                        self.winding = false;
                    } else {
                        triangle(v0, v1, &vtx);
                    }
                }
            }
            TriangleTopology::Strip | TriangleTopology::Fan => {
                if self.strip_ready {
                    if let [Some(v0), Some(v1)] = &self.buffer {
                        triangle(v0, v1, &vtx);
                    }
                }
                self.buffer[self.buffer_index] = Some(vtx);
                self.strip_ready |= self.buffer_index == 1;
                self.buffer_index = match self.topology {
                    TriangleTopology::Strip => 1 - self.buffer_index,
                    _ => 1,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(topology: TriangleTopology, count: u32) -> Vec<[u32; 3]> {
        let mut pa = PrimitiveAssembler::new(topology);
        let mut out = Vec::new();
        for v in 0..count {
            pa.submit_vertex(v, |a, b, c| out.push([*a, *b, *c]));
        }
        out
    }

    #[test]
    fn test_list() {
        assert_eq!(assemble(TriangleTopology::List, 7), vec![[0, 1, 2], [3, 4, 5]]);
    }

    #[test]
    fn test_strip() {
        // Strips alternate the slot they overwrite
        assert_eq!(
            assemble(TriangleTopology::Strip, 5),
            vec![[0, 1, 2], [2, 1, 3], [2, 3, 4]]
        );
    }

    #[test]
    fn test_fan() {
        assert_eq!(
            assemble(TriangleTopology::Fan, 5),
            vec![[0, 1, 2], [0, 2, 3], [0, 3, 4]]
        );
    }

    #[test]
    fn test_shader_winding() {
        let mut pa = PrimitiveAssembler::new(TriangleTopology::Shader);
        let mut out = Vec::new();
        pa.set_winding();
        for v in 0..6u32 {
            pa.submit_vertex(v, |a, b, c| out.push([*a, *b, *c]));
        }
        assert_eq!(out, vec![[1, 0, 2], [3, 4, 5]]);
    }

    #[test]
    fn test_reconfigure_resets() {
        let mut pa = PrimitiveAssembler::new(TriangleTopology::Strip);
        let mut out = Vec::new();
        pa.submit_vertex(0u32, |a, b, c| out.push([*a, *b, *c]));
        pa.submit_vertex(1, |a, b, c| out.push([*a, *b, *c]));
        pa.reconfigure(TriangleTopology::List);
        pa.submit_vertex(2, |a, b, c| out.push([*a, *b, *c]));
        assert!(out.is_empty());
        assert_eq!(pa.topology(), TriangleTopology::List);
    }
}
