//! Procedural field generation
//!
//! A field is a cube of randomly placed nodes plus an optional set of links
//! between them. Nodes live in an index-stable arena; links refer to nodes by
//! index and never own them, so a whole field can be replaced in one move.
//!
//! # Link rule
//!
//! For every index pair `(i, j)` with `i < j`, a link `i -> j` exists when
//! `j` is divisible by `floor(count / 4)`. The outer index plays no part in
//! the test, so each qualifying `j` collects a link from *every* earlier
//! node. With 10 000 nodes that is three hub targets (2500, 5000, 7500)
//! receiving 15 000 links in total. Fields with fewer than four nodes have a
//! divisor of zero and get no links.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// A point in the field with mutable coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Node {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Node {
    /// Create a node at the given position
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Coordinates as an array, in buffer order
    pub fn position(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    /// Move this node toward `target` by fraction `t` on every axis
    pub fn lerp_toward(&mut self, target: &Node, t: f32) {
        self.x = lerp(self.x, target.x, t);
        self.y = lerp(self.y, target.y, t);
        self.z = lerp(self.z, target.z, t);
    }
}

/// A directed segment between two nodes, addressed by index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    /// Index of the source node
    pub source: u32,
    /// Index of the target node
    pub target: u32,
}

impl Link {
    /// Create a link between two node indices
    pub fn new(source: u32, target: u32) -> Self {
        Self { source, target }
    }
}

/// Nodes and links produced together by one generator call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldState {
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
}

impl FieldState {
    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of links
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Check that every link references a node in this state
    pub fn validate(&self) -> Result<()> {
        let count = self.nodes.len();
        for (index, link) in self.links.iter().enumerate() {
            if link.source as usize >= count || link.target as usize >= count {
                return Err(Error::PreconditionViolation(format!(
                    "link {} ({} -> {}) references a node outside 0..{}",
                    index, link.source, link.target, count
                )));
            }
        }
        Ok(())
    }
}

/// Linear interpolation, `a + (b - a) * t`
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Generate `count` nodes uniformly inside a cube of side `extent` centred
/// on the origin, with links per the module-level rule when `create_links`
/// is set.
pub fn generate<R: Rng>(
    rng: &mut R,
    count: usize,
    extent: f32,
    create_links: bool,
) -> Result<FieldState> {
    if count == 0 {
        return Err(Error::InvalidArgument(
            "node count must be positive".to_string(),
        ));
    }
    if count > u32::MAX as usize {
        return Err(Error::InvalidArgument(format!(
            "node count {} exceeds the u32 index space",
            count
        )));
    }
    if !extent.is_finite() || extent <= 0.0 {
        return Err(Error::InvalidArgument(format!(
            "extent must be a positive finite number, got {}",
            extent
        )));
    }

    let half = extent / 2.0;
    let nodes: Vec<Node> = (0..count)
        .map(|_| {
            let x = rng.random::<f32>() * extent - half;
            let y = rng.random::<f32>() * extent - half;
            let z = rng.random::<f32>() * extent - half;
            Node::new(x, y, z)
        })
        .collect();

    let links = if create_links {
        thinned_links(count)
    } else {
        Vec::new()
    };

    Ok(FieldState { nodes, links })
}

/// Enumerate links in nested-loop order (source ascending, then target),
/// visiting only the qualifying targets.
fn thinned_links(count: usize) -> Vec<Link> {
    let divisor = count / 4;
    if divisor == 0 {
        return Vec::new();
    }

    let mut links = Vec::with_capacity(link_count_for(count));
    for source in 0..count {
        let mut target = (source / divisor + 1) * divisor;
        while target < count {
            links.push(Link::new(source as u32, target as u32));
            target += divisor;
        }
    }
    links
}

/// Number of links the rule yields for `count` nodes
pub fn link_count_for(count: usize) -> usize {
    let divisor = count / 4;
    if divisor == 0 || count == 0 {
        return 0;
    }
    // Target j = k * divisor collects j links (one from each smaller index).
    let hubs = (count - 1) / divisor;
    divisor * hubs * (hubs + 1) / 2
}

/// Seeded generator with fixed parameters, used wherever a fresh field is
/// needed repeatedly (initial state, per-cycle targets).
#[derive(Debug, Clone)]
pub struct FieldGenerator {
    rng: ChaCha8Rng,
    count: usize,
    extent: f32,
}

impl FieldGenerator {
    /// Create a generator with a fixed seed for reproducible fields
    pub fn seeded(seed: u64, count: usize, extent: f32) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            count,
            extent,
        }
    }

    /// Create a generator seeded from the thread RNG
    pub fn from_entropy(count: usize, extent: f32) -> Self {
        Self {
            rng: ChaCha8Rng::from_rng(&mut rand::rng()),
            count,
            extent,
        }
    }

    /// Node count of every field this generator produces
    pub fn count(&self) -> usize {
        self.count
    }

    /// Cube side length of every field this generator produces
    pub fn extent(&self) -> f32 {
        self.extent
    }

    /// Produce the next field, advancing the RNG
    pub fn generate(&mut self, create_links: bool) -> Result<FieldState> {
        let state = generate(&mut self.rng, self.count, self.extent, create_links)?;
        if create_links {
            info!(
                nodes = state.node_count(),
                links = state.link_count(),
                "generated field"
            );
        } else {
            debug!(nodes = state.node_count(), "generated target positions");
        }
        Ok(state)
    }
}
