use super::{
    Context, DecoderId, DeviceNode, Enumerator, Memdev, MemdevId, PortId, RegionId,
    collection::Collection, prop::PropertyError,
};
use crate::{
    error::{Error, Result},
    transport::Transport,
};
use alloc::{boxed::Box, vec::Vec};
use bitflags::bitflags;
use utils::range_set::SortedRangeSet;

bitflags! {
    pub struct DecoderFlags: u32 {
        const PMEM_CAPABLE     = 1 << 0;
        const VOLATILE_CAPABLE = 1 << 1;
        /// Type-3 (memory expander) targets.
        const MEM_CAPABLE      = 1 << 2;
        /// Type-2 (accelerator) targets.
        const ACCELMEM_CAPABLE = 1 << 3;
        /// Configuration can no longer change.
        const LOCKED           = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderMode {
    #[default]
    None,
    Mixed,
    Pmem,
    Ram,
}

impl DecoderMode {
    fn parse(text: &str) -> core::result::Result<DecoderMode, PropertyError> {
        match text {
            "none" => Ok(DecoderMode::None),
            "mixed" => Ok(DecoderMode::Mixed),
            "pmem" => Ok(DecoderMode::Pmem),
            "ram" => Ok(DecoderMode::Ram),
            _ => Err(PropertyError::InvalidPropFormat),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetType {
    #[default]
    Unknown,
    Accelerator,
    Expander,
}

/// One interleave position of a decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// 0-based; defines interleave order.
    pub position: u32,
    pub dev_path: Box<str>,
    pub phys_path: Option<Box<str>>,
    pub fw_path: Option<Box<str>>,
    /// Set when the position was programmed with a memdev.
    pub memdev: Option<MemdevId>,
}

impl Target {
    /// Whether `memdev` sits below this target.
    pub fn maps_memdev(&self, memdev: &Memdev) -> bool {
        path_below(&memdev.host_path, &self.dev_path)
            || self
                .phys_path
                .as_deref()
                .is_some_and(|phys| path_below(&memdev.host_path, phys))
    }
}

/// `path` is `parent` or sits under it.
fn path_below(path: &str, parent: &str) -> bool {
    path.strip_prefix(parent)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

#[derive(Debug)]
pub struct Decoder {
    pub name: Box<str>,
    pub instance: u32,
    pub dev_path: Box<str>,
    pub port: PortId,
    pub start: u64,
    pub size: u64,
    pub dpa_resource: Option<u64>,
    pub dpa_size: Option<u64>,
    pub flags: DecoderFlags,
    pub mode: DecoderMode,
    pub target_type: TargetType,
    pub interleave_ways: u32,
    pub interleave_granularity: u32,
    /// Always the length of `targets`.
    pub nr_targets: u32,
    pub(crate) targets: Vec<Target>,
    pub(crate) regions: Collection<RegionId>,
    pub(crate) stale_regions: Vec<RegionId>,
    /// Unclaimed part of the decode window.
    pub(crate) space: SortedRangeSet,
    pub(crate) node: DeviceNode,
    /// Detached from its port by a refresh; kept while stale regions point at it.
    pub(crate) removed: bool,
    /// Region whose program call set the current targets. `None` while the decoder still
    /// carries its enumerated configuration.
    pub(crate) programmed_by: Option<RegionId>,
}

impl Decoder {
    /// Parse a decoder node. Returns the dport ids of its `target_list` alongside.
    pub(crate) fn from_node(
        node: DeviceNode,
        port: PortId,
    ) -> core::result::Result<(Decoder, Vec<u32>), PropertyError> {
        let flag = |name: &str| -> core::result::Result<bool, PropertyError> {
            Ok(node.optional(name, |p| p.value_as_bool())?.unwrap_or(false))
        };
        let mut flags = DecoderFlags::empty();
        flags.set(DecoderFlags::PMEM_CAPABLE, flag("cap_pmem")?);
        flags.set(DecoderFlags::VOLATILE_CAPABLE, flag("cap_ram")?);
        flags.set(DecoderFlags::MEM_CAPABLE, flag("cap_type3")?);
        flags.set(DecoderFlags::ACCELMEM_CAPABLE, flag("cap_type2")?);
        flags.set(DecoderFlags::LOCKED, flag("locked")?);
        let mode = match node.get_property("mode") {
            Some(p) => DecoderMode::parse(p.value_as_str()?)?,
            None => DecoderMode::None,
        };
        let target_type = match node.get_property("target_type") {
            Some(p) => match p.value_as_str()? {
                "accelerator" => TargetType::Accelerator,
                "expander" => TargetType::Expander,
                _ => TargetType::Unknown,
            },
            None => TargetType::Unknown,
        };
        let target_list = node
            .optional("target_list", |p| p.value_as_list_u32())?
            .unwrap_or_default();
        let start = node.optional("start", |p| p.value_as_u64())?.unwrap_or(0);
        let size = node.optional("size", |p| p.value_as_u64())?.unwrap_or(0);
        let end = start.checked_add(size).ok_or(PropertyError::InvalidPropFormat)?;
        let mut space = SortedRangeSet::new();
        space.add(start..end);
        let decoder = Decoder {
            name: node.name.clone(),
            instance: node.id,
            dev_path: node.dev_path.clone(),
            port,
            start,
            size,
            dpa_resource: node.optional("dpa_resource", |p| p.value_as_u64())?,
            dpa_size: node.optional("dpa_size", |p| p.value_as_u64())?,
            flags,
            mode,
            target_type,
            interleave_ways: node
                .optional("interleave_ways", |p| p.value_as_u32())?
                .unwrap_or(1),
            interleave_granularity: node
                .optional("interleave_granularity", |p| p.value_as_u32())?
                .unwrap_or(0),
            nr_targets: 0,
            targets: Vec::new(),
            regions: Collection::default(),
            stale_regions: Vec::new(),
            space,
            node,
            removed: false,
            programmed_by: None,
        };
        Ok((decoder, target_list))
    }

    pub fn is_locked(&self) -> bool {
        self.flags.contains(DecoderFlags::LOCKED)
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Largest window a new region could still claim.
    pub fn max_available_extent(&self) -> u64 {
        self.space.largest()
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub(crate) fn set_targets(&mut self, targets: Vec<Target>) {
        self.nr_targets = targets.len() as u32;
        self.targets = targets;
    }
}

impl<E: Enumerator, T: Transport> Context<E, T> {
    /// Decoder targets in position order.
    pub fn decoder_targets(&self, decoder: DecoderId) -> Result<&[Target]> {
        Ok(&self.decoder(decoder)?.targets)
    }

    pub fn decoder_target_by_position(
        &self,
        decoder: DecoderId,
        position: u32,
    ) -> Result<Option<&Target>> {
        Ok(self
            .decoder(decoder)?
            .targets
            .iter()
            .find(|t| t.position == position))
    }

    pub fn decoder_target_by_memdev(
        &self,
        decoder: DecoderId,
        memdev: MemdevId,
    ) -> Result<Option<&Target>> {
        let dev = self.memdev(memdev)?;
        Ok(self
            .decoder(decoder)?
            .targets
            .iter()
            .find(|t| t.memdev == Some(memdev) || t.maps_memdev(dev)))
    }

    pub fn decoder_max_available_extent(&self, decoder: DecoderId) -> Result<u64> {
        Ok(self.decoder(decoder)?.max_available_extent())
    }

    /// The live memdev behind a target: the programmed one if still present, else the
    /// first cached memdev below the target's path.
    pub(crate) fn target_memdev(&self, target: &Target) -> Option<MemdevId> {
        match target.memdev {
            Some(id) if self.memdevs.contains(id) => Some(id),
            Some(_) => None,
            None => self
                .memdevs
                .iter()
                .find(|(_, dev)| target.maps_memdev(dev))
                .map(|(id, _)| id),
        }
    }

    /// Regions on `decoder` that a refresh invalidated. They can only be deleted.
    pub fn decoder_stale_regions(&self, decoder: DecoderId) -> Result<&[RegionId]> {
        Ok(&self.decoder(decoder)?.stale_regions)
    }
}
