//! Explicit per-draw binding sets.
//!
//! Every draw the shadow passes issue states its full binding set: pipeline,
//! bind groups with their dynamic offsets, vertex buffers and index buffer.
//! A [`BindingTracker`] owned by the render pass diffs the set against what
//! the pass last applied and issues only the changed `set_*` calls. A new
//! render pass starts with a new tracker, so nothing bound in an earlier
//! pass is ever assumed to still be there.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bind group slots tracked per pass.
pub const MAX_BIND_GROUPS: usize = 4;
/// Vertex buffer slots tracked per pass.
pub const MAX_VERTEX_BUFFERS: usize = 2;

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a GPU object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingKey(u64);

impl BindingKey {
    /// Return the next unique key.
    pub fn next() -> Self {
        BindingKey(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A GPU object tagged with a [`BindingKey`] so binding sets can be
/// compared without comparing the objects themselves.
#[derive(Debug)]
pub struct Keyed<T> {
    key: BindingKey,
    value: T,
}

impl<T> Keyed<T> {
    pub fn new(value: T) -> Self {
        Self {
            key: BindingKey::next(),
            value,
        }
    }

    pub fn key(&self) -> BindingKey {
        self.key
    }

    pub fn get(&self) -> &T {
        &self.value
    }
}

impl<T> Deref for Keyed<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Key-only snapshot of a binding set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindingState {
    pub pipeline: Option<BindingKey>,
    pub bind_groups: [Option<(BindingKey, Option<u32>)>; MAX_BIND_GROUPS],
    pub vertex_buffers: [Option<BindingKey>; MAX_VERTEX_BUFFERS],
    pub index_buffer: Option<(BindingKey, wgpu::IndexFormat)>,
}

/// Which slots differ between two binding states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindingChanges {
    pub pipeline: bool,
    pub bind_groups: [bool; MAX_BIND_GROUPS],
    pub vertex_buffers: [bool; MAX_VERTEX_BUFFERS],
    pub index_buffer: bool,
}

impl BindingChanges {
    /// Number of `set_*` calls the change requires.
    pub fn count(&self) -> usize {
        usize::from(self.pipeline)
            + self.bind_groups.iter().filter(|c| **c).count()
            + self.vertex_buffers.iter().filter(|c| **c).count()
            + usize::from(self.index_buffer)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

impl BindingState {
    /// Slots that must be re-applied to go from `self` to `next`.
    pub fn diff(&self, next: &BindingState) -> BindingChanges {
        let mut changes = BindingChanges {
            pipeline: self.pipeline != next.pipeline,
            index_buffer: self.index_buffer != next.index_buffer,
            ..Default::default()
        };
        for (i, changed) in changes.bind_groups.iter_mut().enumerate() {
            *changed = self.bind_groups[i] != next.bind_groups[i];
        }
        for (i, changed) in changes.vertex_buffers.iter_mut().enumerate() {
            *changed = self.vertex_buffers[i] != next.vertex_buffers[i];
        }
        changes
    }
}

/// Everything one draw needs bound.
#[derive(Clone, Copy)]
pub struct BindingSet<'b> {
    pipeline: &'b Keyed<wgpu::RenderPipeline>,
    bind_groups: [Option<(&'b Keyed<wgpu::BindGroup>, Option<u32>)>; MAX_BIND_GROUPS],
    vertex_buffers: [Option<&'b Keyed<wgpu::Buffer>>; MAX_VERTEX_BUFFERS],
    index_buffer: Option<(&'b Keyed<wgpu::Buffer>, wgpu::IndexFormat)>,
}

impl<'b> BindingSet<'b> {
    pub fn new(pipeline: &'b Keyed<wgpu::RenderPipeline>) -> Self {
        Self {
            pipeline,
            bind_groups: [None; MAX_BIND_GROUPS],
            vertex_buffers: [None; MAX_VERTEX_BUFFERS],
            index_buffer: None,
        }
    }

    /// Bind `group` at `slot`, with a dynamic offset if its layout has one.
    pub fn bind_group(mut self, slot: usize, group: &'b Keyed<wgpu::BindGroup>, dynamic_offset: Option<u32>) -> Self {
        if let Some(entry) = self.bind_groups.get_mut(slot) {
            *entry = Some((group, dynamic_offset));
        }
        self
    }

    pub fn vertex_buffer(mut self, slot: usize, buffer: &'b Keyed<wgpu::Buffer>) -> Self {
        if let Some(entry) = self.vertex_buffers.get_mut(slot) {
            *entry = Some(buffer);
        }
        self
    }

    pub fn index_buffer(mut self, buffer: &'b Keyed<wgpu::Buffer>, format: wgpu::IndexFormat) -> Self {
        self.index_buffer = Some((buffer, format));
        self
    }

    pub fn state(&self) -> BindingState {
        let mut state = BindingState {
            pipeline: Some(self.pipeline.key()),
            index_buffer: self.index_buffer.map(|(b, f)| (b.key(), f)),
            ..Default::default()
        };
        for (slot, entry) in self.bind_groups.iter().enumerate() {
            state.bind_groups[slot] = entry.map(|(g, offset)| (g.key(), offset));
        }
        for (slot, entry) in self.vertex_buffers.iter().enumerate() {
            state.vertex_buffers[slot] = entry.map(|b| b.key());
        }
        state
    }
}

/// Per-pass record of applied bindings.
#[derive(Debug, Default)]
pub struct BindingTracker {
    current: BindingState,
    applied: usize,
    skipped: usize,
}

impl BindingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `set` to `pass`, issuing only the calls whose slot changed.
    pub fn apply(&mut self, pass: &mut wgpu::RenderPass<'_>, set: &BindingSet<'_>) -> BindingChanges {
        let next = set.state();
        let changes = self.current.diff(&next);

        if changes.pipeline {
            pass.set_pipeline(set.pipeline);
        }
        for (slot, changed) in changes.bind_groups.iter().enumerate() {
            if !changed {
                continue;
            }
            match set.bind_groups[slot] {
                Some((group, Some(offset))) => pass.set_bind_group(slot as u32, group.get(), &[offset]),
                Some((group, None)) => pass.set_bind_group(slot as u32, group.get(), &[]),
                None => pass.set_bind_group(slot as u32, None::<&wgpu::BindGroup>, &[]),
            }
        }
        for (slot, changed) in changes.vertex_buffers.iter().enumerate() {
            if let (true, Some(buffer)) = (*changed, set.vertex_buffers[slot]) {
                pass.set_vertex_buffer(slot as u32, buffer.slice(..));
            }
        }
        if let (true, Some((buffer, format))) = (changes.index_buffer, set.index_buffer) {
            pass.set_index_buffer(buffer.slice(..), format);
        }

        let issued = changes.count();
        self.applied += issued;
        self.skipped += MAX_BIND_GROUPS + MAX_VERTEX_BUFFERS + 2 - issued;
        self.current = next;
        changes
    }

    /// State as of the last applied set.
    pub fn current(&self) -> &BindingState {
        &self.current
    }

    /// Total `set_*` calls issued.
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Total slots left untouched because they already matched.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}
