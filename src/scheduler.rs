//! Perpetual interpolation between generated fields
//!
//! The scheduler blends the displayed node positions toward a target field
//! and, at the end of every cycle, asks its [`TargetSource`] for the next
//! target. It loops forever:
//!
//! ```text
//! Idle --tick--> Running --progress == 1--> Completing --regenerate--> Running ...
//! ```
//!
//! Blending is applied to the already-blended position each tick
//! (`displayed = lerp(displayed, target, progress)`), so motion eases out
//! toward the target rather than following a straight timed path.
//!
//! The host supplies time. [`InterpolationScheduler::tick`] takes the time
//! since the current cycle began; [`InterpolationScheduler::advance`] takes
//! a per-frame delta and keeps the cycle clock itself.

use tracing::{debug, warn};

use crate::buffer::GeometryBuffers;
use crate::error::{Error, Result};
use crate::field::{FieldGenerator, FieldState, Link, Node};

/// Default cycle length in milliseconds
pub const DEFAULT_CYCLE_DURATION_MS: f64 = 5000.0;

/// Supplies the next interpolation target at every cycle boundary
pub trait TargetSource {
    /// Produce a field with the same node count as the displayed one
    fn next_target(&mut self) -> Result<FieldState>;
}

impl TargetSource for FieldGenerator {
    fn next_target(&mut self) -> Result<FieldState> {
        // Link topology is fixed at startup; targets only carry positions.
        self.generate(false)
    }
}

/// Where the scheduler is within its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Constructed, not yet ticked
    Idle,
    /// Blending, progress in [0, 1)
    Running,
    /// Progress reached 1 and the target was swapped
    Completing,
}

/// Outcome of one tick or advance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    /// Blend factor applied on this tick
    pub progress: f32,
    /// `Completing` when this tick finished a cycle, otherwise `Running`
    pub phase: Phase,
    /// Targets generated during this call
    pub regenerations: u32,
}

/// Blends displayed nodes toward a regenerated target, cycle after cycle
#[derive(Debug)]
pub struct InterpolationScheduler<S> {
    source: S,
    displayed: FieldState,
    target: FieldState,
    cycle_duration_ms: f64,
    cycle_elapsed_ms: f64,
    progress: f32,
    phase: Phase,
    cycles_completed: u64,
}

impl<S: TargetSource> InterpolationScheduler<S> {
    /// Start from `initial`, pulling the first target from `source`
    pub fn new(initial: FieldState, mut source: S, cycle_duration_ms: f64) -> Result<Self> {
        if !cycle_duration_ms.is_finite() || cycle_duration_ms <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "cycle duration must be a positive number of milliseconds, got {}",
                cycle_duration_ms
            )));
        }
        initial.validate()?;

        let target = source.next_target()?;
        check_target(&initial, &target)?;

        Ok(Self {
            source,
            displayed: initial,
            target,
            cycle_duration_ms,
            cycle_elapsed_ms: 0.0,
            progress: 0.0,
            phase: Phase::Idle,
            cycles_completed: 0,
        })
    }

    /// Blend toward the target using `elapsed_ms` since the cycle began,
    /// then rewrite `buffers`. Reaching progress 1 completes the cycle.
    pub fn tick(&mut self, elapsed_ms: f64, buffers: &mut GeometryBuffers) -> Result<TickReport> {
        let progress = if elapsed_ms.is_finite() && elapsed_ms >= 0.0 {
            let raw = (elapsed_ms / self.cycle_duration_ms).clamp(0.0, 1.0) as f32;
            raw.max(self.progress)
        } else {
            warn!(elapsed_ms, "non-finite or negative cycle time; holding progress");
            self.progress
        };
        self.progress = progress;
        self.phase = Phase::Running;

        if progress >= 1.0 {
            self.displayed.nodes.copy_from_slice(&self.target.nodes);
        } else {
            for (node, target) in self.displayed.nodes.iter_mut().zip(&self.target.nodes) {
                node.lerp_toward(target, progress);
            }
        }
        buffers.sync(&self.displayed.nodes, &self.displayed.links)?;

        if progress < 1.0 {
            return Ok(TickReport {
                progress,
                phase: Phase::Running,
                regenerations: 0,
            });
        }

        self.phase = Phase::Completing;
        self.complete_cycle()?;
        Ok(TickReport {
            progress,
            phase: Phase::Completing,
            regenerations: 1,
        })
    }

    /// Advance the cycle clock by one frame's `delta_ms` and tick.
    ///
    /// A delayed frame that spans several boundaries completes each of them
    /// in turn; leftover time carries into the following cycle.
    pub fn advance(&mut self, delta_ms: f64, buffers: &mut GeometryBuffers) -> Result<TickReport> {
        if delta_ms.is_finite() && delta_ms >= 0.0 {
            self.cycle_elapsed_ms += delta_ms;
        } else {
            warn!(delta_ms, "non-finite or negative frame delta; ignoring");
        }

        let mut regenerations = 0;
        loop {
            let report = self.tick(self.cycle_elapsed_ms, buffers)?;
            regenerations += report.regenerations;
            if report.phase != Phase::Completing {
                return Ok(TickReport {
                    regenerations,
                    ..report
                });
            }
            self.cycle_elapsed_ms -= self.cycle_duration_ms;
            if self.cycle_elapsed_ms < self.cycle_duration_ms {
                return Ok(TickReport {
                    regenerations,
                    ..report
                });
            }
        }
    }

    fn complete_cycle(&mut self) -> Result<()> {
        let next = self.source.next_target()?;
        check_target(&self.displayed, &next)?;

        // The exhausted target is already the displayed baseline.
        self.target = next;
        self.progress = 0.0;
        self.phase = Phase::Running;
        self.cycles_completed += 1;
        debug!(cycle = self.cycles_completed, "interpolation cycle complete");
        Ok(())
    }

    /// Blend factor of the latest tick (0 after a cycle completes)
    pub fn progress(&self) -> f32 {
        self.progress
    }

    /// Current state machine phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of finished cycles
    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed
    }

    /// Configured cycle length
    pub fn cycle_duration_ms(&self) -> f64 {
        self.cycle_duration_ms
    }

    /// Time accumulated in the current cycle by [`advance`](Self::advance)
    pub fn cycle_elapsed_ms(&self) -> f64 {
        self.cycle_elapsed_ms
    }

    /// Positions currently on screen
    pub fn displayed(&self) -> &[Node] {
        &self.displayed.nodes
    }

    /// Fixed link set of the displayed field
    pub fn links(&self) -> &[Link] {
        &self.displayed.links
    }

    /// Positions being blended toward
    pub fn target(&self) -> &[Node] {
        &self.target.nodes
    }
}

fn check_target(displayed: &FieldState, target: &FieldState) -> Result<()> {
    if displayed.node_count() != target.node_count() {
        return Err(Error::PreconditionViolation(format!(
            "target has {} nodes but {} are displayed",
            target.node_count(),
            displayed.node_count()
        )));
    }
    Ok(())
}
