//! Instance Broadcaster
//!
//! Replicates a source container's surface across other containers' transforms.
//! Surface buffers are never duplicated: per source the renderer gets one
//! transform pair per instance and a chunk → owning container table, and draws
//! every instance with the source's draw arguments (instance count = N + 1).

use std::collections::{BTreeMap, HashMap};

use glam::Mat4;

use crate::container::ContainerId;
use crate::error::{EngineError, EngineResult};

/// Transform pair of one instance as seen by the renderer.
///
/// Layout (128 bytes):
/// - model: mat4x4<f32>     container space -> world   (64 bytes)
/// - inverse: mat4x4<f32>   world -> container space   (64 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceTransform {
    pub model: [[f32; 4]; 4],
    pub inverse: [[f32; 4]; 4],
}

const _: () = assert!(std::mem::size_of::<InstanceTransform>() == 128);

impl Default for InstanceTransform {
    fn default() -> Self {
        Self::from_mat4(Mat4::IDENTITY)
    }
}

impl InstanceTransform {
    pub fn from_mat4(model: Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            inverse: model.inverse().to_cols_array_2d(),
        }
    }
}

/// Result of attaching an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    /// The source already has `max_instances` instances; nothing changed
    AtCapacity,
}

/// Source → instances bookkeeping.
#[derive(Debug, Default)]
pub struct InstanceBroadcaster {
    sources: BTreeMap<ContainerId, Vec<ContainerId>>,
    source_of: HashMap<ContainerId, ContainerId>,
    dirty: std::collections::BTreeSet<ContainerId>,
    max_instances: u32,
}

impl InstanceBroadcaster {
    pub fn new(max_instances: u32) -> Self {
        Self {
            max_instances,
            ..Default::default()
        }
    }

    pub fn set_max_instances(&mut self, max_instances: u32) {
        self.max_instances = max_instances;
    }

    /// Make `instance` draw `source`'s surface. Re-attaching moves it.
    pub fn attach_instance(&mut self, source: ContainerId, instance: ContainerId) -> EngineResult<AttachOutcome> {
        if source == instance {
            return Err(EngineError::InvalidConfig(format!(
                "container {:?} cannot instance itself",
                source
            )));
        }
        if self.source_of.contains_key(&source) {
            return Err(EngineError::InvalidConfig(format!(
                "container {:?} is an instance and cannot be a source",
                source
            )));
        }
        if self.sources.contains_key(&instance) {
            return Err(EngineError::InvalidConfig(format!(
                "container {:?} has instances of its own",
                instance
            )));
        }
        if self.source_of.get(&instance) == Some(&source) {
            return Ok(AttachOutcome::Attached);
        }
        let count = self.sources.get(&source).map_or(0, Vec::len);
        if count as u32 >= self.max_instances {
            log::warn!(
                "[Instances] {:?} already has {} instances (max {})",
                source,
                count,
                self.max_instances
            );
            return Ok(AttachOutcome::AtCapacity);
        }
        self.detach_instance(instance);
        self.sources.entry(source).or_default().push(instance);
        self.source_of.insert(instance, source);
        self.dirty.insert(source);
        Ok(AttachOutcome::Attached)
    }

    /// Stop instancing. Returns the former source.
    pub fn detach_instance(&mut self, instance: ContainerId) -> Option<ContainerId> {
        let source = self.source_of.remove(&instance)?;
        if let Some(list) = self.sources.get_mut(&source) {
            list.retain(|&c| c != instance);
            if list.is_empty() {
                self.sources.remove(&source);
            }
        }
        self.dirty.insert(source);
        Some(source)
    }

    /// Forget a destroyed container in either role.
    pub fn remove_container(&mut self, id: ContainerId) {
        self.detach_instance(id);
        if let Some(list) = self.sources.remove(&id) {
            for instance in list {
                self.source_of.remove(&instance);
            }
        }
        self.dirty.remove(&id);
    }

    pub fn instances_of(&self, source: ContainerId) -> &[ContainerId] {
        self.sources.get(&source).map_or(&[], Vec::as_slice)
    }

    pub fn source_of(&self, instance: ContainerId) -> Option<ContainerId> {
        self.source_of.get(&instance).copied()
    }

    pub fn is_instance(&self, id: ContainerId) -> bool {
        self.source_of.contains_key(&id)
    }

    /// Flag a source whose transforms must be uploaded again.
    pub fn mark_dirty(&mut self, id: ContainerId) {
        if let Some(source) = self.source_of(id) {
            self.dirty.insert(source);
        } else {
            self.dirty.insert(id);
        }
    }

    /// Sources whose membership or transforms changed, ascending.
    pub fn take_dirty(&mut self) -> Vec<ContainerId> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    /// `chunk_owner[(instance * chunk_count) + chunk]`, instance 0 being the source.
    pub fn chunk_owner_table(&self, source: ContainerId, chunk_count: u32) -> Vec<u32> {
        std::iter::once(source)
            .chain(self.instances_of(source).iter().copied())
            .flat_map(|owner| std::iter::repeat_n(owner.0, chunk_count as usize))
            .collect()
    }

    /// Transforms of the source followed by its instances.
    pub fn transforms(&self, source: ContainerId, transform_of: impl Fn(ContainerId) -> Mat4) -> Vec<InstanceTransform> {
        std::iter::once(source)
            .chain(self.instances_of(source).iter().copied())
            .map(|id| InstanceTransform::from_mat4(transform_of(id)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_attach_and_owner_table() {
        let mut b = InstanceBroadcaster::new(4);
        let src = ContainerId(1);
        assert_eq!(b.attach_instance(src, ContainerId(5)).unwrap(), AttachOutcome::Attached);
        assert_eq!(b.attach_instance(src, ContainerId(6)).unwrap(), AttachOutcome::Attached);
        assert_eq!(b.chunk_owner_table(src, 2), vec![1, 1, 5, 5, 6, 6]);
        assert_eq!(b.take_dirty(), vec![src]);
        assert!(b.take_dirty().is_empty());
    }

    #[test]
    fn test_capacity_and_invalid_links() {
        let mut b = InstanceBroadcaster::new(1);
        let src = ContainerId(1);
        b.attach_instance(src, ContainerId(2)).unwrap();
        assert_eq!(b.attach_instance(src, ContainerId(3)).unwrap(), AttachOutcome::AtCapacity);
        assert!(b.attach_instance(src, src).is_err());
        assert!(b.attach_instance(ContainerId(2), ContainerId(4)).is_err());
        assert!(b.attach_instance(ContainerId(9), src).is_err());
    }

    #[test]
    fn test_detach_and_remove() {
        let mut b = InstanceBroadcaster::new(8);
        let src = ContainerId(1);
        b.attach_instance(src, ContainerId(2)).unwrap();
        b.attach_instance(src, ContainerId(3)).unwrap();
        assert_eq!(b.detach_instance(ContainerId(2)), Some(src));
        assert_eq!(b.instances_of(src), &[ContainerId(3)]);
        b.remove_container(src);
        assert!(b.instances_of(src).is_empty());
        assert_eq!(b.source_of(ContainerId(3)), None);
    }

    #[test]
    fn test_transforms_carry_inverse() {
        let mut b = InstanceBroadcaster::new(8);
        let src = ContainerId(1);
        b.attach_instance(src, ContainerId(2)).unwrap();
        let t = b.transforms(src, |id| Mat4::from_translation(Vec3::splat(id.0 as f32)));
        assert_eq!(t.len(), 2);
        let model = Mat4::from_cols_array_2d(&t[1].model);
        let inverse = Mat4::from_cols_array_2d(&t[1].inverse);
        assert!((model * inverse).abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }
}
