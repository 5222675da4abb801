//! Ring buffer of animated density impacts.
//!
//! Each impact is a sphere that grows from zero to its target radius along
//! an easing curve. The pool has a fixed number of slots; spawning always
//! writes the slot under the cursor and advances it, so the oldest impact is
//! overwritten once the pool is full, even if it is still growing.

use std::sync::{Arc, PoisonError, RwLock};

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::clouds::curve::EasingCurve;
use crate::core::types::Vec3;

/// Where unused slots park their centre so they can never touch a ray.
pub const PARKED_CENTER: Vec3 = Vec3::splat(10_000.0);

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One animated impact as seen by the evaluator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DensityImpact {
    pub center: Vec3,
    pub radius: f32,
    pub target_radius: f32,
    pub age: f32,
    pub lifetime: f32,
}

impl DensityImpact {
    /// An unspawned slot: parked far away with zero radius.
    fn parked(settings: &ImpactSettings) -> Self {
        Self {
            center: PARKED_CENTER,
            radius: 0.0,
            target_radius: settings.target_radius,
            age: 0.0,
            lifetime: settings.lifetime,
        }
    }

    /// Normalized animation progress in `[0, 1]`.
    #[inline]
    pub fn progress(&self) -> f32 {
        if self.lifetime <= 0.0 {
            1.0
        } else {
            (self.age / self.lifetime).clamp(0.0, 1.0)
        }
    }

    /// Compact GPU-layout record.
    #[inline]
    pub fn record(&self) -> ImpactRecord {
        ImpactRecord {
            center: self.center.to_array(),
            radius: self.radius,
        }
    }
}

/// Per-impact record consumed by the evaluator, one `float4` per impact.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ImpactRecord {
    pub center: [f32; 3],
    pub radius: f32,
}

impl ImpactRecord {
    /// Byte view of a record slice for upload to a storage buffer.
    pub fn as_bytes(records: &[ImpactRecord]) -> &[u8] {
        bytemuck::cast_slice(records)
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        Vec3::from(self.center)
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Pool size and animation shape shared by every slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactSettings {
    /// Number of slots in the ring.
    pub capacity: usize,
    /// Seconds from spawn to full size.
    pub lifetime: f32,
    /// Final radius in world units.
    pub target_radius: f32,
    /// Growth curve; should satisfy `curve(0) = 0` and `curve(1) = 1`.
    pub curve: EasingCurve,
}

impl Default for ImpactSettings {
    fn default() -> Self {
        Self {
            capacity: 10,
            lifetime: 2.0,
            target_radius: 1.5,
            curve: EasingCurve::EaseInOut,
        }
    }
}

// ---------------------------------------------------------------------------
// ImpactBuffer
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct ImpactSlot {
    impact: DensityImpact,
    spawned: bool,
}

/// Fixed-capacity ring of impacts with a write cursor.
#[derive(Clone, Debug)]
pub struct ImpactBuffer {
    slots: Vec<ImpactSlot>,
    cursor: usize,
    curve: EasingCurve,
    spawn_count: u64,
}

impl ImpactBuffer {
    /// Pre-allocate every slot in the parked state.
    pub fn new(settings: &ImpactSettings) -> Self {
        let capacity = settings.capacity.max(1);
        let slots = (0..capacity)
            .map(|_| ImpactSlot {
                impact: DensityImpact::parked(settings),
                spawned: false,
            })
            .collect();

        Self {
            slots,
            cursor: 0,
            curve: settings.curve.clone(),
            spawn_count: 0,
        }
    }

    /// Start a new impact at `position` in the slot under the cursor.
    ///
    /// Returns the slot index that was written.
    pub fn spawn(&mut self, position: Vec3) -> usize {
        let index = self.cursor;
        let slot = &mut self.slots[index];
        if slot.spawned && slot.impact.age < slot.impact.lifetime {
            log::debug!("Impact slot {index} recycled mid-growth");
        }

        slot.impact.center = position;
        slot.impact.radius = 0.0;
        slot.impact.age = 0.0;
        slot.spawned = true;

        self.cursor = (self.cursor + 1) % self.slots.len();
        self.spawn_count += 1;
        index
    }

    /// Advance every spawned impact by `dt` seconds.
    ///
    /// Age keeps counting past the lifetime while the radius holds at
    /// `curve(1) * target_radius`. A zero lifetime reaches full size on the
    /// first tick. Non-positive or non-finite steps are ignored.
    pub fn tick(&mut self, dt: f32) {
        if !dt.is_finite() || dt <= 0.0 {
            return;
        }

        for slot in self.slots.iter_mut().filter(|s| s.spawned) {
            let impact = &mut slot.impact;
            impact.age += dt;
            impact.radius = self.curve.evaluate(impact.progress()) * impact.target_radius;
        }
    }

    /// Copy of every slot in ring order.
    pub fn snapshot(&self) -> Vec<DensityImpact> {
        self.slots.iter().map(|s| s.impact).collect()
    }

    /// Compact records for the evaluator, in ring order.
    pub fn records(&self) -> Vec<ImpactRecord> {
        self.slots.iter().map(|s| s.impact.record()).collect()
    }

    /// Slot contents by index.
    pub fn get(&self, index: usize) -> Option<&DensityImpact> {
        self.slots.get(index).map(|s| &s.impact)
    }

    /// Number of slots that have been spawned at least once.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.spawned).count()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Index of the slot the next spawn will overwrite.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Total spawns since creation.
    #[inline]
    pub fn spawn_count(&self) -> u64 {
        self.spawn_count
    }
}

// ---------------------------------------------------------------------------
// SharedImpactBuffer
// ---------------------------------------------------------------------------

/// Lock-protected handle for when input and rendering run on different threads.
///
/// Snapshots copy under a read lock, so a concurrent spawn can never expose a
/// half-written record.
#[derive(Clone, Debug)]
pub struct SharedImpactBuffer {
    inner: Arc<RwLock<ImpactBuffer>>,
}

impl SharedImpactBuffer {
    pub fn new(settings: &ImpactSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ImpactBuffer::new(settings))),
        }
    }

    pub fn spawn(&self, position: Vec3) -> usize {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).spawn(position)
    }

    pub fn tick(&self, dt: f32) {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).tick(dt);
    }

    pub fn snapshot(&self) -> Vec<DensityImpact> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).snapshot()
    }

    pub fn records(&self) -> Vec<ImpactRecord> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).records()
    }

    pub fn live_count(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).live_count()
    }
}
