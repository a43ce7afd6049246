//! Ordered render pass composition

use crate::config::BloomConfig;
use crate::error::{Error, Result};

/// One stage of the frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pass {
    /// Draw lines and points into the scene target
    Scene,
    /// Keep pixels brighter than `threshold` and blur them
    BloomExtract { threshold: f32 },
    /// Add the blurred highlights back onto the scene
    BloomComposite { strength: f32, radius: f32 },
}

impl Pass {
    /// Stable name used in logs and GPU debug labels
    pub fn label(&self) -> &'static str {
        match self {
            Pass::Scene => "scene",
            Pass::BloomExtract { .. } => "bloom-extract",
            Pass::BloomComposite { .. } => "bloom-composite",
        }
    }
}

/// Validated pass sequence
#[derive(Debug, Clone, PartialEq)]
pub struct Composer {
    passes: Vec<Pass>,
}

impl Composer {
    /// Build from an explicit pass list.
    ///
    /// The scene pass must come first and appear once; a composite needs an
    /// extract before it.
    pub fn new(passes: Vec<Pass>) -> Result<Self> {
        if passes.first() != Some(&Pass::Scene) {
            return Err(Error::InvalidArgument(
                "the first pass must be the scene pass".to_string(),
            ));
        }

        let mut extracted = false;
        for pass in &passes[1..] {
            match pass {
                Pass::Scene => {
                    return Err(Error::InvalidArgument(
                        "the scene pass may only appear once".to_string(),
                    ));
                }
                Pass::BloomExtract { threshold } => {
                    if !threshold.is_finite() || *threshold < 0.0 {
                        return Err(Error::InvalidArgument(format!(
                            "bloom threshold must be >= 0, got {}",
                            threshold
                        )));
                    }
                    extracted = true;
                }
                Pass::BloomComposite { .. } if !extracted => {
                    return Err(Error::InvalidArgument(
                        "bloom composite needs a bloom extract pass before it".to_string(),
                    ));
                }
                Pass::BloomComposite { .. } => {}
            }
        }
        Ok(Self { passes })
    }

    /// Scene followed by bloom extraction and composite
    pub fn bloom(config: &BloomConfig) -> Self {
        Self {
            passes: vec![
                Pass::Scene,
                Pass::BloomExtract {
                    threshold: config.threshold,
                },
                Pass::BloomComposite {
                    strength: config.strength,
                    radius: config.radius,
                },
            ],
        }
    }

    /// Scene pass alone
    pub fn scene_only() -> Self {
        Self {
            passes: vec![Pass::Scene],
        }
    }

    /// The passes in execution order
    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    /// Extraction threshold, if a bloom extract pass is present
    pub fn bloom_threshold(&self) -> Option<f32> {
        self.passes.iter().find_map(|p| match p {
            Pass::BloomExtract { threshold } => Some(*threshold),
            _ => None,
        })
    }

    /// Composite `(strength, radius)`, if a bloom composite pass is present
    pub fn bloom_composite(&self) -> Option<(f32, f32)> {
        self.passes.iter().find_map(|p| match p {
            Pass::BloomComposite { strength, radius } => Some((*strength, *radius)),
            _ => None,
        })
    }
}
