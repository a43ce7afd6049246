//! CPU-side vertex buffers mirrored on the GPU
//!
//! Each buffer is a flat `f32` array sized once from the topology and then
//! rewritten in place every frame. A write sets the dirty flag; only the
//! renderer clears it, after it has queued the upload.

use crate::error::{Error, Result};
use crate::field::{FieldState, Link, Node};

/// Floats per node in the point buffer (x, y, z)
pub const FLOATS_PER_NODE: usize = 3;

/// Floats per link in the line buffer (source xyz, target xyz)
pub const FLOATS_PER_LINK: usize = 6;

/// A fixed-capacity flat position buffer with a dirty flag
#[derive(Debug, Clone)]
pub struct VertexBuffer {
    data: Vec<f32>,
    dirty: bool,
    version: u64,
}

impl VertexBuffer {
    /// Point buffer for `node_count` nodes
    pub fn for_nodes(node_count: usize) -> Self {
        Self::with_len(node_count * FLOATS_PER_NODE)
    }

    /// Line buffer for `link_count` links
    pub fn for_links(link_count: usize) -> Self {
        Self::with_len(link_count * FLOATS_PER_LINK)
    }

    fn with_len(len: usize) -> Self {
        Self {
            data: vec![0.0; len],
            dirty: false,
            version: 0,
        }
    }

    /// Rewrite the buffer with node positions, `x0, y0, z0, x1, ...`
    pub fn write_positions(&mut self, nodes: &[Node]) -> Result<()> {
        let expected = nodes.len() * FLOATS_PER_NODE;
        self.check_len(expected, "node")?;

        for (chunk, node) in self.data.chunks_exact_mut(FLOATS_PER_NODE).zip(nodes) {
            chunk.copy_from_slice(&node.position());
        }
        self.touch();
        Ok(())
    }

    /// Rewrite the buffer with link endpoints resolved against `nodes`,
    /// `sx, sy, sz, tx, ty, tz` per link in link order.
    pub fn write_link_positions(&mut self, links: &[Link], nodes: &[Node]) -> Result<()> {
        let expected = links.len() * FLOATS_PER_LINK;
        self.check_len(expected, "link")?;

        // Resolve everything before touching the buffer so a bad index
        // leaves the previous frame intact.
        if let Some(bad) = links
            .iter()
            .find(|l| l.source as usize >= nodes.len() || l.target as usize >= nodes.len())
        {
            return Err(Error::PreconditionViolation(format!(
                "link {} -> {} does not resolve against {} nodes",
                bad.source,
                bad.target,
                nodes.len()
            )));
        }

        for (chunk, link) in self.data.chunks_exact_mut(FLOATS_PER_LINK).zip(links) {
            let source = &nodes[link.source as usize];
            let target = &nodes[link.target as usize];
            chunk[..3].copy_from_slice(&source.position());
            chunk[3..].copy_from_slice(&target.position());
        }
        self.touch();
        Ok(())
    }

    fn check_len(&self, expected: usize, what: &str) -> Result<()> {
        if expected != self.data.len() {
            return Err(Error::PreconditionViolation(format!(
                "{} buffer holds {} floats but the {} sequence needs {}",
                what,
                self.data.len(),
                what,
                expected
            )));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.version += 1;
    }

    /// Current contents
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Number of floats
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds no floats (empty topology)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of vertices (three floats each)
    pub fn vertex_count(&self) -> usize {
        self.data.len() / 3
    }

    /// Size of the contents in bytes
    pub fn byte_len(&self) -> usize {
        std::mem::size_of_val(self.data.as_slice())
    }

    /// Whether the contents changed since the last upload
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of writes since creation
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Clear the dirty flag; called by a renderer once the upload is queued
    pub fn mark_uploaded(&mut self) {
        self.dirty = false;
    }
}

/// The point and line buffers for one field
#[derive(Debug, Clone)]
pub struct GeometryBuffers {
    pub points: VertexBuffer,
    pub lines: VertexBuffer,
}

impl GeometryBuffers {
    /// Size buffers for `field` and fill them with its current positions
    pub fn for_field(field: &FieldState) -> Result<Self> {
        let mut buffers = Self {
            points: VertexBuffer::for_nodes(field.node_count()),
            lines: VertexBuffer::for_links(field.link_count()),
        };
        buffers.sync(&field.nodes, &field.links)?;
        Ok(buffers)
    }

    /// Rewrite both buffers from the given nodes and links
    pub fn sync(&mut self, nodes: &[Node], links: &[Link]) -> Result<()> {
        self.points.write_positions(nodes)?;
        self.lines.write_link_positions(links, nodes)?;
        Ok(())
    }

    /// Whether either buffer needs uploading
    pub fn is_dirty(&self) -> bool {
        self.points.is_dirty() || self.lines.is_dirty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn nodes() -> Vec<Node> {
        vec![
            Node::new(1.0, 2.0, 3.0),
            Node::new(4.0, 5.0, 6.0),
            Node::new(7.0, 8.0, 9.0),
        ]
    }

    #[test]
    fn positions_are_flattened_in_node_order() {
        let mut buffer = VertexBuffer::for_nodes(3);
        buffer.write_positions(&nodes()).unwrap();
        assert_eq!(
            buffer.as_slice(),
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]
        );
        assert_eq!(buffer.vertex_count(), 3);
        assert_eq!(buffer.byte_len(), 36);
    }

    #[test]
    fn link_blocks_hold_source_then_target() {
        let links = [Link::new(0, 2), Link::new(1, 2)];
        let mut buffer = VertexBuffer::for_links(2);
        buffer.write_link_positions(&links, &nodes()).unwrap();
        assert_eq!(buffer.len(), 12);
        assert_eq!(
            buffer.as_slice(),
            &[
                1.0, 2.0, 3.0, 7.0, 8.0, 9.0, //
                4.0, 5.0, 6.0, 7.0, 8.0, 9.0,
            ]
        );
    }

    #[test]
    fn link_blocks_track_moved_endpoints() {
        let links = [Link::new(0, 1)];
        let mut positions = nodes();
        let mut buffer = VertexBuffer::for_links(1);
        buffer.write_link_positions(&links, &positions).unwrap();

        positions[1] = Node::new(-1.0, -1.0, -1.0);
        buffer.write_link_positions(&links, &positions).unwrap();
        assert_eq!(&buffer.as_slice()[3..], &[-1.0, -1.0, -1.0]);
    }

    #[test]
    fn writes_set_dirty_and_upload_clears_it() {
        let mut buffer = VertexBuffer::for_nodes(3);
        assert!(!buffer.is_dirty());

        buffer.write_positions(&nodes()).unwrap();
        assert!(buffer.is_dirty());
        assert_eq!(buffer.version(), 1);

        buffer.mark_uploaded();
        assert!(!buffer.is_dirty());

        buffer.write_positions(&nodes()).unwrap();
        assert!(buffer.is_dirty());
        assert_eq!(buffer.version(), 2);
    }

    #[test]
    fn writes_reuse_the_backing_store() {
        let mut buffer = VertexBuffer::for_nodes(3);
        let before = buffer.as_slice().as_ptr();
        for _ in 0..10 {
            buffer.write_positions(&nodes()).unwrap();
        }
        assert_eq!(buffer.as_slice().as_ptr(), before);
    }

    #[test]
    fn wrong_node_count_is_rejected_without_writing() {
        let mut buffer = VertexBuffer::for_nodes(2);
        let err = buffer.write_positions(&nodes()).unwrap_err();
        assert!(matches!(err, Error::PreconditionViolation(_)));
        assert!(!buffer.is_dirty());
        assert_eq!(buffer.as_slice(), &[0.0; 6]);
    }

    #[test]
    fn wrong_link_count_is_rejected() {
        let mut buffer = VertexBuffer::for_links(1);
        let links = [Link::new(0, 1), Link::new(1, 2)];
        let err = buffer.write_link_positions(&links, &nodes()).unwrap_err();
        assert!(matches!(err, Error::PreconditionViolation(_)));
    }

    #[test]
    fn dangling_link_is_rejected_without_writing() {
        let mut buffer = VertexBuffer::for_links(2);
        let links = [Link::new(0, 1), Link::new(1, 9)];
        let err = buffer.write_link_positions(&links, &nodes()).unwrap_err();
        assert!(matches!(err, Error::PreconditionViolation(_)));
        assert!(!buffer.is_dirty());
    }

    #[test]
    fn geometry_buffers_size_from_field() {
        let field = FieldState {
            nodes: nodes(),
            links: vec![Link::new(0, 1), Link::new(0, 2), Link::new(1, 2)],
        };
        let buffers = GeometryBuffers::for_field(&field).unwrap();
        assert_eq!(buffers.points.len(), 9);
        assert_eq!(buffers.lines.len(), 18);
        assert!(buffers.is_dirty());
    }

    #[test]
    fn empty_link_set_gives_empty_line_buffer() {
        let field = FieldState {
            nodes: nodes(),
            links: Vec::new(),
        };
        let buffers = GeometryBuffers::for_field(&field).unwrap();
        assert!(buffers.lines.is_empty());
    }

    proptest! {
        #[test]
        fn point_buffer_round_trips(coords in prop::collection::vec(any::<(f32, f32, f32)>(), 0..64)) {
            let nodes: Vec<Node> = coords.iter().map(|&(x, y, z)| Node::new(x, y, z)).collect();
            let mut buffer = VertexBuffer::for_nodes(nodes.len());
            buffer.write_positions(&nodes).unwrap();
            prop_assert_eq!(buffer.len(), nodes.len() * 3);
            for (i, node) in nodes.iter().enumerate() {
                let got = &buffer.as_slice()[i * 3..i * 3 + 3];
                prop_assert_eq!(got[0].to_bits(), node.x.to_bits());
                prop_assert_eq!(got[1].to_bits(), node.y.to_bits());
                prop_assert_eq!(got[2].to_bits(), node.z.to_bits());
            }
        }
    }
}
