//! Lazy population of the topology collections.
//!
//! The first walk of a collection asks the enumeration service for it; later walks return
//! the cached ids. All nodes are parsed before anything is inserted, so a malformed node
//! leaves the context as it was. Entries a refresh kept are handed out again under the
//! same id when the service still reports them unchanged.

use super::{
    Arena, Bus, BusId, Context, Decoder, DecoderId, DeviceNode, Dport, DportId, Enumerator,
    Id, Memdev, MemdevId, Port, PortId, PortType, Region, RegionId, Target, enumeration_error,
};
use crate::{
    error::{Error, Result},
    transport::Transport,
};
use alloc::{format, vec::Vec};
use utils::debug_ex;

pub(crate) enum Fresh<I, V> {
    Reuse(I),
    New(V),
}

/// Keep the first node of every device path.
pub(crate) fn dedup(nodes: Vec<DeviceNode>) -> Vec<DeviceNode> {
    let mut res: Vec<DeviceNode> = Vec::with_capacity(nodes.len());
    for node in nodes {
        if !res.iter().any(|n| n.dev_path == node.dev_path) {
            res.push(node);
        }
    }
    res
}

/// Pair fresh nodes with retained entries holding an identical node. Returns the slots in
/// node order and the retained ids nothing matched.
pub(crate) fn match_retained<I: Copy>(
    nodes: Vec<DeviceNode>,
    retained: &[(I, &DeviceNode)],
) -> (Vec<Fresh<I, DeviceNode>>, Vec<I>) {
    let mut used = alloc::vec![false; retained.len()];
    let mut slots = Vec::with_capacity(nodes.len());
    for node in nodes {
        match retained
            .iter()
            .position(|(_, old)| **old == node)
            .filter(|i| !used[*i])
        {
            Some(i) => {
                used[i] = true;
                slots.push(Fresh::Reuse(retained[i].0));
            }
            None => slots.push(Fresh::New(node)),
        }
    }
    let dropped = retained
        .iter()
        .zip(used)
        .filter(|(_, used)| !used)
        .map(|((id, _), _)| *id)
        .collect();
    (slots, dropped)
}

/// Parse every new node, failing before anything is stored.
fn parse_all<I, V>(
    slots: Vec<Fresh<I, DeviceNode>>,
    mut parse: impl FnMut(DeviceNode) -> Result<V>,
) -> Result<Vec<Fresh<I, V>>> {
    slots
        .into_iter()
        .map(|slot| match slot {
            Fresh::Reuse(id) => Ok(Fresh::Reuse(id)),
            Fresh::New(node) => parse(node).map(Fresh::New),
        })
        .collect()
}

fn place<V>(arena: &mut Arena<V>, fresh: Vec<Fresh<Id<V>, V>>) -> Vec<Id<V>> {
    fresh
        .into_iter()
        .map(|slot| match slot {
            Fresh::Reuse(id) => id,
            Fresh::New(value) => arena.insert(value),
        })
        .collect()
}

impl<E: Enumerator, T: Transport> Context<E, T> {
    /// Buses of the host, one per CXL root complex.
    pub fn buses(&mut self) -> Result<Vec<BusId>> {
        if let Some(ids) = self.bus_list.get() {
            return Ok(ids.to_vec());
        }
        let nodes = self.enumerator.buses().map_err(enumeration_error)?;
        let retained: Vec<(BusId, &DeviceNode)> = self
            .bus_list
            .retained()
            .iter()
            .filter_map(|id| self.buses.get(*id).map(|b| (*id, &b.node)))
            .collect();
        let (slots, dropped) = match_retained(dedup(nodes), &retained);
        let placeholder = self.buses.vacant_id();
        let fresh = parse_all(slots, |node| {
            let port = Port::from_node(node.clone(), PortType::Root, None, placeholder)?;
            Ok((node, port))
        })?;
        let mut ids = Vec::with_capacity(fresh.len());
        for slot in fresh {
            match slot {
                Fresh::Reuse(id) => ids.push(id),
                Fresh::New((node, mut port)) => {
                    let bus = self.buses.vacant_id();
                    port.bus = bus;
                    let port = self.ports.insert(port);
                    ids.push(self.buses.insert(Bus {
                        name: node.name.clone(),
                        instance: node.id,
                        dev_path: node.dev_path.clone(),
                        port,
                        node,
                    }));
                }
            }
        }
        let mut stale = Vec::new();
        for id in dropped {
            if let Some(bus) = self.buses.remove(id) {
                self.retire_port(bus.port, &mut stale);
            }
        }
        debug_ex!("populated {} buses", ids.len());
        self.bus_list.fill(ids.clone());
        Ok(ids)
    }

    /// Memory devices of the host, enumerated once per context.
    pub fn memdevs(&mut self) -> Result<Vec<MemdevId>> {
        if let Some(ids) = self.memdev_list.get() {
            return Ok(ids.to_vec());
        }
        let nodes = self.enumerator.memdevs().map_err(enumeration_error)?;
        let retained: Vec<(MemdevId, &DeviceNode)> = self
            .memdev_list
            .retained()
            .iter()
            .filter_map(|id| self.memdevs.get(*id).map(|m| (*id, &m.node)))
            .collect();
        let (slots, dropped) = match_retained(dedup(nodes), &retained);
        let fresh = parse_all(slots, |node| Ok(Memdev::from_node(node)?))?;
        let ids = place(&mut self.memdevs, fresh);
        for id in dropped {
            self.memdevs.remove(id);
        }
        debug_ex!("populated {} memdevs", ids.len());
        self.memdev_list.fill(ids.clone());
        Ok(ids)
    }

    /// Switch ports directly below `port`. Empty for endpoints.
    pub fn child_ports(&mut self, port: PortId) -> Result<Vec<PortId>> {
        self.populate_ports(port, PortType::Switch)
    }

    /// Endpoint ports directly below `port`. Empty for endpoints.
    pub fn endpoints(&mut self, port: PortId) -> Result<Vec<PortId>> {
        self.populate_ports(port, PortType::Endpoint)
    }

    fn populate_ports(&mut self, parent: PortId, kind: PortType) -> Result<Vec<PortId>> {
        let p = self.port(parent)?;
        let coll = match kind {
            PortType::Endpoint => &p.endpoints,
            _ => &p.child_ports,
        };
        if let Some(ids) = coll.get() {
            return Ok(ids.to_vec());
        }
        let (bus, depth, is_endpoint) = (p.bus, p.depth, p.is_endpoint());
        let nodes = if is_endpoint {
            Vec::new()
        } else {
            let res = match kind {
                PortType::Endpoint => self.enumerator.endpoints(&p.dev_path),
                _ => self.enumerator.child_ports(&p.dev_path),
            };
            res.map_err(enumeration_error)?
        };
        let retained: Vec<(PortId, &DeviceNode)> = coll
            .retained()
            .iter()
            .filter_map(|id| self.ports.get(*id).map(|p| (*id, &p.node)))
            .collect();
        let (slots, dropped) = match_retained(dedup(nodes), &retained);
        let fresh = parse_all(slots, |node| {
            Ok(Port::from_node(node, kind, Some((parent, depth)), bus)?)
        })?;
        let ids = place(&mut self.ports, fresh);
        let mut stale = Vec::new();
        for id in dropped {
            self.retire_port(id, &mut stale);
        }
        debug_ex!("populated {} {:?} ports", ids.len(), kind);
        let p = self.port_mut(parent)?;
        match kind {
            PortType::Endpoint => p.endpoints.fill(ids.clone()),
            _ => p.child_ports.fill(ids.clone()),
        }
        Ok(ids)
    }

    /// Downstream ports of `port`. Empty for endpoints.
    pub fn dports(&mut self, port: PortId) -> Result<Vec<DportId>> {
        let p = self.port(port)?;
        if let Some(ids) = p.dports.get() {
            return Ok(ids.to_vec());
        }
        let nodes = if p.is_endpoint() {
            Vec::new()
        } else {
            self.enumerator
                .dports(&p.dev_path)
                .map_err(enumeration_error)?
        };
        let retained: Vec<(DportId, &DeviceNode)> = p
            .dports
            .retained()
            .iter()
            .filter_map(|id| self.dports.get(*id).map(|d| (*id, &d.node)))
            .collect();
        let (slots, dropped) = match_retained(dedup(nodes), &retained);
        let fresh = parse_all(slots, |node| Ok(Dport::from_node(node, port)?))?;
        let ids = place(&mut self.dports, fresh);
        for id in dropped {
            self.dports.remove(id);
        }
        debug_ex!("populated {} dports", ids.len());
        self.port_mut(port)?.dports.fill(ids.clone());
        Ok(ids)
    }

    /// Decoders of `port`. Every port type has them.
    pub fn decoders(&mut self, port: PortId) -> Result<Vec<DecoderId>> {
        let p = self.port(port)?;
        if let Some(ids) = p.decoders.get() {
            return Ok(ids.to_vec());
        }
        // target lists name dports by instance
        let dport_ids = self.dports(port)?;
        let p = self.port(port)?;
        let nodes = self
            .enumerator
            .decoders(&p.dev_path)
            .map_err(enumeration_error)?;
        let retained: Vec<(DecoderId, &DeviceNode)> = p
            .decoders
            .retained()
            .iter()
            .filter_map(|id| self.decoders.get(*id).map(|d| (*id, &d.node)))
            .collect();
        let (slots, dropped) = match_retained(dedup(nodes), &retained);
        let dports: Vec<&Dport> = dport_ids
            .iter()
            .filter_map(|id| self.dports.get(*id))
            .collect();
        let fresh = parse_all(slots, |node| {
            let (mut decoder, target_list) = Decoder::from_node(node, port)?;
            let mut targets = Vec::with_capacity(target_list.len());
            for (position, instance) in target_list.into_iter().enumerate() {
                let dport = dports
                    .iter()
                    .find(|d| d.instance == instance)
                    .ok_or_else(|| {
                        Error::Enumeration(
                            format!("{}: no dport{} for target", decoder.name, instance)
                                .into_boxed_str(),
                        )
                    })?;
                targets.push(Target {
                    position: position as u32,
                    dev_path: dport.dev_path.clone(),
                    phys_path: dport.phys_path.clone(),
                    fw_path: dport.fw_path.clone(),
                    memdev: None,
                });
            }
            decoder.set_targets(targets);
            Ok(decoder)
        })?;
        let ids = place(&mut self.decoders, fresh);
        let mut stale = Vec::new();
        for id in dropped {
            self.retire_decoder(id, &mut stale);
        }
        debug_ex!("populated {} decoders", ids.len());
        self.port_mut(port)?.decoders.fill(ids.clone());
        Ok(ids)
    }

    /// Active regions of `decoder`; stale ones are listed by
    /// [Context::decoder_stale_regions].
    pub fn decoder_regions(&mut self, decoder: DecoderId) -> Result<Vec<RegionId>> {
        let dec = self.decoder(decoder)?;
        if let Some(ids) = dec.regions.get() {
            return Ok(ids.to_vec());
        }
        let nodes = self
            .enumerator
            .regions(&dec.dev_path)
            .map_err(enumeration_error)?;
        let mut local = Vec::new();
        let mut retained: Vec<(RegionId, &DeviceNode)> = Vec::new();
        for id in dec.regions.retained() {
            match self.regions.get(*id).map(|r| r.node.as_ref()) {
                Some(Some(node)) => retained.push((*id, node)),
                Some(None) => local.push(*id),
                None => {}
            }
        }
        let (slots, dropped) = match_retained(dedup(nodes), &retained);
        let fresh = parse_all(slots, |node| Ok(Region::from_node(node, decoder)?))?;
        let mut claimed = Vec::new();
        for slot in fresh.iter() {
            if let Fresh::New(region) = slot {
                claimed.push(region.window());
            }
        }
        let mut ids = place(&mut self.regions, fresh);
        ids.extend(local);
        let mut stale = Vec::new();
        for id in dropped {
            self.stale_region(decoder, id, &mut stale);
        }
        let dec = self.decoder_mut(decoder)?;
        for window in claimed {
            dec.space.sub(window);
        }
        debug_ex!("{}: populated {} regions", dec.name, ids.len());
        dec.regions.fill(ids.clone());
        Ok(ids)
    }
}
