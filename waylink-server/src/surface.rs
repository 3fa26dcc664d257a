//! Double-buffered surface state
//!
//! Requests accumulate in [`SurfaceState::pending`]; `commit` moves the
//! pending set into [`SurfaceState::current`] in one step, which is the only
//! point where the compositor-visible content changes.

use waylink_core::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Where a surface is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SurfacePhase {
    #[default]
    Created,
    /// A buffer is pending
    Attached,
    /// Pending state has been applied at least once
    Committed,
}

/// A buffer handed over via `attach`, with its offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferAttach {
    /// `None` detaches the content on the next commit
    pub buffer: Option<ObjectId>,
    pub x: i32,
    pub y: i32,
}

/// One side of the double buffer.
#[derive(Debug, Default, Clone)]
pub struct SurfaceContent {
    pub attachment: Option<BufferAttach>,
    pub damage: Vec<Rect>,
    pub opaque_region: Option<ObjectId>,
    pub input_region: Option<ObjectId>,
    pub buffer_transform: i32,
    pub buffer_scale: i32,
    pub offset: (i32, i32),
}

#[derive(Debug, Default)]
pub struct SurfaceState {
    pub phase: SurfacePhase,
    pub pending: SurfaceContent,
    pub current: SurfaceContent,
    /// How many commits this surface has seen
    pub commit_count: u64,
}

impl SurfaceState {
    pub fn attach(&mut self, buffer: Option<ObjectId>, x: i32, y: i32) {
        self.pending.attachment = Some(BufferAttach { buffer, x, y });
        self.phase = SurfacePhase::Attached;
    }

    pub fn damage(&mut self, rect: Rect) {
        self.pending.damage.push(rect);
    }

    /// Apply all pending state atomically.
    pub fn commit(&mut self) {
        let damage = std::mem::take(&mut self.pending.damage);
        self.current = SurfaceContent {
            damage,
            ..self.pending.clone()
        };
        self.pending.attachment = None;
        self.phase = SurfacePhase::Committed;
        self.commit_count += 1;
    }
}

/// The operations defining a region, in request order.
#[derive(Debug, Default)]
pub struct RegionState {
    pub ops: Vec<(RegionOp, Rect)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionOp {
    Add,
    Subtract,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    fn id(n: u32) -> ObjectId {
        ObjectId(NonZeroU32::new(n).unwrap())
    }

    #[test]
    fn commit_applies_pending_state() {
        let mut surface = SurfaceState::default();
        assert_eq!(surface.phase, SurfacePhase::Created);

        surface.attach(Some(id(10)), 1, 2);
        assert_eq!(surface.phase, SurfacePhase::Attached);
        surface.damage(Rect {
            x: 0,
            y: 0,
            width: 64,
            height: 64,
        });
        assert!(surface.current.attachment.is_none());

        surface.commit();
        assert_eq!(surface.phase, SurfacePhase::Committed);
        assert_eq!(
            surface.current.attachment,
            Some(BufferAttach {
                buffer: Some(id(10)),
                x: 1,
                y: 2
            })
        );
        assert_eq!(surface.current.damage.len(), 1);
        // Pending side is clean again
        assert!(surface.pending.damage.is_empty());
        assert!(surface.pending.attachment.is_none());
    }

    #[test]
    fn commit_cycle_accumulates() {
        let mut surface = SurfaceState::default();
        surface.attach(Some(id(10)), 0, 0);
        surface.commit();
        surface.attach(Some(id(11)), 0, 0);
        surface.commit();
        assert_eq!(surface.commit_count, 2);
        assert_eq!(
            surface.current.attachment.and_then(|a| a.buffer),
            Some(id(11))
        );
    }
}
