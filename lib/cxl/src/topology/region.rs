//! Regions and their decode-state machine.
//!
//! ```text
//! Unknown --program--> Reset --commit--> Commit
//!                       ^  \--program--/    |
//!                       +------reset--------+
//! ```
//! A region invalidated by a refresh is stale: every transition fails with [Error::Stale]
//! and [Context::delete_region] is the only operation left.

use super::{
    Context, DecoderId, DeviceNode, Enumerator, MemdevId, PortType, RegionId, Target,
    collection::Collection, memdev::ensure_module, prop::PropertyError,
};
use crate::{
    config::{MAX_INTERLEAVE_GRANULARITY, MAX_INTERLEAVE_WAYS, MIN_INTERLEAVE_GRANULARITY},
    error::{Error, Result},
    record::Uuid,
    transport::Transport,
};
use alloc::{boxed::Box, format, vec::Vec};
use core::ops::Range;
use log::info;
use spin::Once;
use utils::{debug_ex, num::AlignableTo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeState {
    /// Not known yet, or never programmed.
    #[default]
    Unknown,
    /// Programmed, not routing traffic.
    Reset,
    /// Routing traffic.
    Commit,
}

/// A region's participation of one decoder at one interleave position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub position: u32,
    pub decoder_name: Box<str>,
    pub decoder: Option<DecoderId>,
    pub memdev: Option<MemdevId>,
}

/// Window and interleave of a region to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionParams {
    pub uuid: Uuid,
    pub start: u64,
    pub size: u64,
    pub interleave_ways: u32,
    pub interleave_granularity: u32,
}

#[derive(Debug)]
pub struct Region {
    pub name: Box<str>,
    pub instance: u32,
    pub dev_path: Box<str>,
    pub decoder: DecoderId,
    pub uuid: Uuid,
    pub start: u64,
    pub size: u64,
    pub interleave_ways: u32,
    pub interleave_granularity: u32,
    pub decode_state: DecodeState,
    pub modalias: Option<Box<str>>,
    pub(crate) mappings: Collection<Mapping>,
    /// `None` for regions created through this context.
    pub(crate) node: Option<DeviceNode>,
    pub(crate) module: Once<()>,
    pub(crate) stale: bool,
}

const VALID_WAYS: [u32; 8] = [1, 2, 3, 4, 6, 8, 12, 16];

fn check_interleave(size: u64, ways: u32, granularity: u32) -> Result<()> {
    if !VALID_WAYS.contains(&ways) || ways as u64 > MAX_INTERLEAVE_WAYS {
        return Err(Error::InvalidArgument("unsupported interleave ways"));
    }
    let granularity = granularity as u64;
    if !granularity.is_power_of_two()
        || !(MIN_INTERLEAVE_GRANULARITY..=MAX_INTERLEAVE_GRANULARITY).contains(&granularity)
    {
        return Err(Error::InvalidArgument("unsupported interleave granularity"));
    }
    if size == 0 || !size.is_aligned_to(ways as u64) {
        return Err(Error::InvalidArgument(
            "interleave ways do not divide region size",
        ));
    }
    Ok(())
}

fn check_distinct(memdevs: &[MemdevId]) -> Result<()> {
    for (i, id) in memdevs.iter().enumerate() {
        if memdevs[..i].contains(id) {
            return Err(Error::InvalidArgument("memdev appears twice in target list"));
        }
    }
    Ok(())
}

impl Region {
    pub(crate) fn from_node(
        node: DeviceNode,
        decoder: DecoderId,
    ) -> core::result::Result<Region, PropertyError> {
        let uuid = match node.get_property("uuid") {
            Some(p) => {
                let text = p.value_as_str()?;
                if text.is_empty() {
                    Uuid::NIL
                } else {
                    Uuid::parse(text).map_err(|_| PropertyError::InvalidPropFormat)?
                }
            }
            None => Uuid::NIL,
        };
        let decode_state = match node.get_property("decode_state") {
            Some(p) => match p.value_as_str()? {
                "reset" => DecodeState::Reset,
                "commit" => DecodeState::Commit,
                _ => DecodeState::Unknown,
            },
            None => DecodeState::Unknown,
        };
        Ok(Region {
            name: node.name.clone(),
            instance: node.id,
            dev_path: node.dev_path.clone(),
            decoder,
            uuid,
            start: node.u64_prop("start")?,
            size: node.u64_prop("size")?,
            interleave_ways: node.u32_prop("interleave_ways")?,
            interleave_granularity: node.u32_prop("interleave_granularity")?,
            decode_state,
            modalias: node.optional("modalias", |p| p.value_as_str().map(Box::from))?,
            mappings: Collection::default(),
            node: Some(node),
            module: Once::new(),
            stale: false,
        })
    }

    pub fn window(&self) -> Range<u64> {
        self.start..self.start.saturating_add(self.size)
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }
}

impl<E: Enumerator, T: Transport> Context<E, T> {
    fn live_region(&self, region: RegionId) -> Result<&Region> {
        let res = self.region(region)?;
        if res.stale {
            return Err(Error::Stale);
        }
        Ok(res)
    }

    /// Create a region in state [DecodeState::Unknown] on `decoder`.
    ///
    /// The window must fit in the decoder's unclaimed space. A decoder with an empty window
    /// takes its window from the first region programmed on it.
    pub fn create_region(&mut self, decoder: DecoderId, params: RegionParams) -> Result<RegionId> {
        check_interleave(
            params.size,
            params.interleave_ways,
            params.interleave_granularity,
        )?;
        let end = params
            .start
            .checked_add(params.size)
            .ok_or(Error::InvalidArgument("region window overflows"))?;
        let window = params.start..end;
        let existing = self.decoder_regions(decoder)?;
        let dec = self.decoder(decoder)?;
        if dec.removed {
            return Err(Error::Stale);
        }
        if dec.is_locked() {
            return Err(Error::InvalidArgument("decoder is locked"));
        }
        if dec.size != 0 {
            if !dec.space.contains(&window) {
                return Err(Error::InvalidArgument(
                    "region window is outside the free decoder space",
                ));
            }
        } else {
            for id in existing.iter() {
                let other = self.region(*id)?.window();
                if other.start < window.end && window.start < other.end {
                    return Err(Error::InvalidArgument("region window overlaps a region"));
                }
            }
        }
        let instance = existing
            .iter()
            .chain(dec.stale_regions.iter())
            .filter_map(|id| self.regions.get(*id))
            .map(|r| r.instance + 1)
            .max()
            .unwrap_or(0);
        let region = Region {
            name: format!("region{}", instance).into_boxed_str(),
            instance,
            dev_path: format!("{}/region{}", dec.dev_path, instance).into_boxed_str(),
            decoder,
            uuid: params.uuid,
            start: params.start,
            size: params.size,
            interleave_ways: params.interleave_ways,
            interleave_granularity: params.interleave_granularity,
            decode_state: DecodeState::Unknown,
            modalias: None,
            mappings: Collection::Populated(Vec::new()),
            node: None,
            module: Once::new(),
            stale: false,
        };
        let id = self.regions.insert(region);
        let dec = self.decoder_mut(decoder)?;
        dec.regions.push(id);
        if dec.size != 0 {
            dec.space.sub(window);
        }
        info!("{}: created region{} uuid {}", dec.name, instance, params.uuid);
        Ok(id)
    }

    /// Program the owning decoder for `region`: window, interleave and one target per
    /// memdev, in position order. Leaves the region in [DecodeState::Reset].
    pub fn program_region(&mut self, region: RegionId, targets: &[MemdevId]) -> Result<()> {
        let reg = self.live_region(region)?;
        if reg.decode_state == DecodeState::Commit {
            return Err(Error::InvalidArgument("region is committed"));
        }
        let (decoder, window, ways, granularity) = (
            reg.decoder,
            reg.window(),
            reg.interleave_ways,
            reg.interleave_granularity,
        );
        check_interleave(window.end - window.start, ways, granularity)?;
        let dec = self.decoder(decoder)?;
        if dec.removed {
            return Err(Error::Stale);
        }
        if dec.is_locked() {
            return Err(Error::InvalidArgument("decoder is locked"));
        }
        if dec.size != 0 && !(dec.start <= window.start && window.end <= dec.start + dec.size) {
            return Err(Error::InvalidArgument("region window is outside the decoder"));
        }
        if targets.len() != ways as usize {
            return Err(Error::InvalidArgument(
                "target count does not match interleave ways",
            ));
        }
        let sibling_committed = dec.regions.entries().iter().any(|id| {
            *id != region
                && self
                    .regions
                    .get(*id)
                    .is_some_and(|r| r.decode_state == DecodeState::Commit)
        });
        if sibling_committed {
            return Err(Error::InvalidArgument("decoder has a committed region"));
        }
        check_distinct(targets)?;
        let mut new_targets = Vec::with_capacity(targets.len());
        let mut mappings = Vec::with_capacity(targets.len());
        for (position, id) in targets.iter().enumerate() {
            let dev = self.memdev(*id)?;
            let position = position as u32;
            new_targets.push(Target {
                position,
                dev_path: dev.host_path.clone(),
                phys_path: None,
                fw_path: None,
                memdev: Some(*id),
            });
            let endpoint_decoder = self
                .ports
                .iter()
                .filter(|(_, port)| port.port_type == PortType::Endpoint)
                .find(|(_, port)| port.memdev == Some(*id) || port.uport == dev.host_path)
                .and_then(|(_, port)| port.decoders.get().and_then(|d| d.first().copied()));
            let decoder_name = endpoint_decoder
                .and_then(|d| self.decoders.get(d))
                .map_or_else(|| Box::from(""), |d| d.name.clone());
            mappings.push(Mapping {
                position,
                decoder_name,
                decoder: endpoint_decoder,
                memdev: Some(*id),
            });
        }

        let dec = self.decoder_mut(decoder)?;
        if dec.size == 0 {
            dec.start = window.start;
            dec.size = window.end - window.start;
        }
        dec.interleave_ways = ways;
        dec.interleave_granularity = granularity;
        dec.set_targets(new_targets);
        dec.programmed_by = Some(region);
        debug_ex!("{}: programmed {} targets", dec.name, dec.nr_targets);

        let reg = self.region_mut(region)?;
        reg.mappings.fill(mappings);
        reg.decode_state = DecodeState::Reset;
        Ok(())
    }

    /// Start routing traffic for a programmed region.
    pub fn commit_region(&mut self, region: RegionId) -> Result<()> {
        let reg = self.live_region(region)?;
        match reg.decode_state {
            DecodeState::Unknown => {
                return Err(Error::InvalidArgument("region was never programmed"));
            }
            DecodeState::Commit => {
                return Err(Error::InvalidArgument("region is already committed"));
            }
            DecodeState::Reset => {}
        }
        let (ways, size) = (reg.interleave_ways, reg.size);
        let dec = self.decoder(reg.decoder)?;
        if dec.removed {
            return Err(Error::Stale);
        }
        if dec.programmed_by.is_some_and(|r| r != region) {
            return Err(Error::InvalidArgument(
                "decoder is programmed for another region",
            ));
        }
        if dec.targets.len() != dec.nr_targets as usize || dec.targets.len() != ways as usize {
            return Err(Error::InvalidArgument(
                "decoder target list does not match interleave ways",
            ));
        }
        if !size.is_aligned_to(ways as u64) {
            return Err(Error::InvalidArgument(
                "interleave ways do not divide region size",
            ));
        }
        let mut memdevs = Vec::with_capacity(dec.targets.len());
        for target in dec.targets.iter() {
            let id = self.target_memdev(target).ok_or(Error::InvalidArgument(
                "target does not resolve to a live memdev",
            ))?;
            memdevs.push(id);
        }
        check_distinct(&memdevs)?;
        let name = dec.name.clone();
        let reg = self.region_mut(region)?;
        reg.decode_state = DecodeState::Commit;
        info!("{}: committed {}", name, reg.name);
        Ok(())
    }

    /// Tear down a committed region. The decoder keeps its configuration.
    pub fn reset_region(&mut self, region: RegionId) -> Result<()> {
        if self.live_region(region)?.decode_state != DecodeState::Commit {
            return Err(Error::InvalidArgument("region is not committed"));
        }
        let reg = self.region_mut(region)?;
        reg.decode_state = DecodeState::Reset;
        info!("reset {}", reg.name);
        Ok(())
    }

    /// Remove a region. Committed regions must be reset first; stale regions can always go.
    pub fn delete_region(&mut self, region: RegionId) -> Result<()> {
        let reg = self.region(region)?;
        let (decoder, window, stale) = (reg.decoder, reg.window(), reg.stale);
        if !stale && reg.decode_state == DecodeState::Commit {
            return Err(Error::InvalidArgument("region is committed"));
        }
        let mut drop_decoder = false;
        if let Some(dec) = self.decoders.get_mut(decoder) {
            if stale {
                dec.stale_regions.retain(|id| *id != region);
                drop_decoder = dec.removed && dec.stale_regions.is_empty();
            } else {
                dec.regions.remove(&region);
                let decoder_window = dec.start..dec.start.saturating_add(dec.size);
                if decoder_window.start <= window.start && window.end <= decoder_window.end {
                    dec.space.add(window);
                }
            }
        }
        if drop_decoder {
            self.decoders.remove(decoder);
        }
        if let Some(reg) = self.regions.remove(region) {
            info!("deleted {}", reg.name);
        }
        Ok(())
    }

    /// Interleave mappings of a region, read on first use.
    pub fn region_mappings(&mut self, region: RegionId) -> Result<Vec<Mapping>> {
        let reg = self.live_region(region)?;
        if let Some(mappings) = reg.mappings.get() {
            return Ok(mappings.to_vec());
        }
        let nodes = match &reg.node {
            Some(node) => self
                .enumerator
                .mappings(&node.dev_path)
                .map_err(super::enumeration_error)?,
            None => Vec::new(),
        };
        let mut mappings = Vec::with_capacity(nodes.len());
        for node in nodes.iter() {
            let decoder_name: Box<str> = Box::from(node.str_prop("decoder")?);
            let decoder = self
                .decoders
                .iter()
                .find(|(_, d)| !d.removed && d.name == decoder_name)
                .map(|(id, _)| id);
            let memdev = decoder
                .and_then(|d| self.decoders.get(d))
                .and_then(|d| self.ports.get(d.port))
                .filter(|port| port.port_type == PortType::Endpoint)
                .and_then(|port| {
                    port.memdev.filter(|id| self.memdevs.contains(*id)).or_else(|| {
                        self.memdevs
                            .iter()
                            .find(|(_, dev)| dev.host_path == port.uport)
                            .map(|(id, _)| id)
                    })
                });
            mappings.push(Mapping {
                position: node.u32_prop("position")?,
                decoder_name,
                decoder,
                memdev,
            });
        }
        mappings.sort_by_key(|m| m.position);
        debug_ex!("populated {} mappings", mappings.len());
        self.region_mut(region)?.mappings.fill(mappings.clone());
        Ok(mappings)
    }

    /// Make sure the driver behind `region` is loaded.
    pub fn ensure_region_module(&self, region: RegionId) -> Result<()> {
        let reg = self.live_region(region)?;
        ensure_module(self.modules.as_deref(), reg.modalias.as_deref(), &reg.module)
    }
}
