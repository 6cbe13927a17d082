//! Explicit re-synchronisation with the enumeration service.
//!
//! Nothing is re-read behind the caller's back: [Context::refresh_port] and
//! [Context::refresh_memdevs] compare cached nodes with fresh ones and drop the populated
//! tag of exactly the collections that changed. Unchanged entries keep their ids. Regions
//! whose decoder went away or changed become stale instead of being freed.

use super::{
    Context, DecoderId, DeviceNode, Enumerator, MemdevId, PortId, RegionId, enumeration_error,
    populate::dedup,
};
use crate::{error::Result, transport::Transport};
use alloc::vec::Vec;
use log::{info, warn};
use utils::debug_ex;

/// What a port refresh changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub child_ports_changed: bool,
    pub endpoints_changed: bool,
    pub decoders_changed: bool,
    pub dports_changed: bool,
    /// Regions moved to a stale list by this refresh.
    pub stale: Vec<RegionId>,
}

type ListFn<E> =
    fn(&E, &str) -> core::result::Result<Vec<DeviceNode>, <E as Enumerator>::TError>;

struct Diff<I> {
    changed: bool,
    keep: Vec<I>,
    gone: Vec<I>,
}

fn diff<I: Copy>(current: &[(I, &DeviceNode)], fresh: &[DeviceNode]) -> Diff<I> {
    let mut keep = Vec::new();
    let mut gone = Vec::new();
    for (id, node) in current {
        if fresh.iter().any(|f| f == *node) {
            keep.push(*id);
        } else {
            gone.push(*id);
        }
    }
    let changed = current.len() != fresh.len()
        || current.iter().zip(fresh).any(|((_, old), new)| *old != new);
    Diff {
        changed,
        keep,
        gone,
    }
}

impl<E: Enumerator, T: Transport> Context<E, T> {
    /// Drop a port and everything below it. Decoders are detached, not freed, while they
    /// still own stale regions.
    pub(crate) fn retire_port(&mut self, id: PortId, stale: &mut Vec<RegionId>) {
        let Some(port) = self.ports.remove(id) else {
            return;
        };
        for child in port.child_ports.entries().iter().chain(port.endpoints.entries()) {
            self.retire_port(*child, stale);
        }
        for decoder in port.decoders.entries() {
            self.retire_decoder(*decoder, stale);
        }
        for dport in port.dports.entries() {
            self.dports.remove(*dport);
        }
        debug_ex!("retired {}", port.name);
    }

    pub(crate) fn retire_decoder(&mut self, id: DecoderId, stale: &mut Vec<RegionId>) {
        let Some(dec) = self.decoders.get_mut(id) else {
            return;
        };
        dec.removed = true;
        let regions = dec.regions.entries().to_vec();
        dec.regions.fill(Vec::new());
        for region in regions {
            if let Some(reg) = self.regions.get_mut(region) {
                reg.stale = true;
                warn!("{}: decoder {} went away, region is stale", reg.name, dec.name);
                dec.stale_regions.push(region);
                stale.push(region);
            }
        }
        if dec.stale_regions.is_empty() {
            self.decoders.remove(id);
        }
    }

    /// Move one region of a live decoder to its stale list and release its window.
    pub(crate) fn stale_region(
        &mut self,
        decoder: DecoderId,
        region: RegionId,
        stale: &mut Vec<RegionId>,
    ) {
        let Some(reg) = self.regions.get_mut(region) else {
            return;
        };
        reg.stale = true;
        let window = reg.window();
        warn!("{}: changed under us, region is stale", reg.name);
        if let Some(dec) = self.decoders.get_mut(decoder) {
            dec.regions.remove(&region);
            dec.stale_regions.push(region);
            if dec.start <= window.start && window.end <= dec.start.saturating_add(dec.size) {
                dec.space.add(window);
            }
        }
        stale.push(region);
    }

    /// Re-read the populated collections of `port` and invalidate the ones that changed.
    ///
    /// Everything is fetched before anything is touched: on error the cache is left as it
    /// was.
    pub fn refresh_port(&mut self, port: PortId) -> Result<RefreshReport> {
        let p = self.port(port)?;
        let is_endpoint = p.is_endpoint();
        let fetch_children = !is_endpoint && p.child_ports.is_populated();
        let fetch_endpoints = !is_endpoint && p.endpoints.is_populated();
        let fetch_dports = !is_endpoint && p.dports.is_populated();
        let fetch_decoders = p.decoders.is_populated();

        let enumerator = &self.enumerator;
        let path = p.dev_path.as_ref();
        let fetch = |wanted: bool, list: ListFn<E>| {
            wanted
                .then(|| list(enumerator, path))
                .transpose()
                .map(|nodes| nodes.map(dedup))
                .map_err(enumeration_error)
        };
        let fresh_children = fetch(fetch_children, E::child_ports)?;
        let fresh_endpoints = fetch(fetch_endpoints, E::endpoints)?;
        let fresh_dports = fetch(fetch_dports, E::dports)?;
        let fresh_decoders = fetch(fetch_decoders, E::decoders)?;

        let port_nodes = |ids: &[PortId]| -> Vec<(PortId, &DeviceNode)> {
            ids.iter()
                .filter_map(|id| self.ports.get(*id).map(|p| (*id, &p.node)))
                .collect()
        };
        let child_diff = fresh_children
            .as_deref()
            .map(|fresh| diff(&port_nodes(p.child_ports.entries()), fresh));
        let endpoint_diff = fresh_endpoints
            .as_deref()
            .map(|fresh| diff(&port_nodes(p.endpoints.entries()), fresh));
        let dport_diff = fresh_dports.as_deref().map(|fresh| {
            let current: Vec<_> = p
                .dports
                .entries()
                .iter()
                .filter_map(|id| self.dports.get(*id).map(|d| (*id, &d.node)))
                .collect();
            diff(&current, fresh)
        });
        let decoder_diff = fresh_decoders.as_deref().map(|fresh| {
            let current: Vec<_> = p
                .decoders
                .entries()
                .iter()
                .filter_map(|id| self.decoders.get(*id).map(|d| (*id, &d.node)))
                .collect();
            diff(&current, fresh)
        });

        // regions of surviving decoders that were already read
        let surviving: Vec<DecoderId> = match &decoder_diff {
            Some(d) => d.keep.clone(),
            None => p.decoders.entries().to_vec(),
        };
        let mut region_diffs = Vec::new();
        for id in surviving {
            let Some(dec) = self.decoders.get(id) else {
                continue;
            };
            if !dec.regions.is_populated() {
                continue;
            }
            let fresh = dedup(
                enumerator
                    .regions(&dec.dev_path)
                    .map_err(enumeration_error)?,
            );
            let current: Vec<_> = dec
                .regions
                .entries()
                .iter()
                .filter_map(|r| {
                    self.regions
                        .get(*r)
                        .and_then(|reg| reg.node.as_ref().map(|n| (*r, n)))
                })
                .collect();
            region_diffs.push((id, diff(&current, &fresh)));
        }
        let port_name = p.name.clone();

        // nothing below can fail
        let mut report = RefreshReport::default();
        if let Some(d) = child_diff.filter(|d| d.changed) {
            info!("{}: child ports changed", port_name);
            report.child_ports_changed = true;
            self.port_mut(port)?.child_ports.invalidate(|id| d.keep.contains(id));
            for id in d.gone {
                self.retire_port(id, &mut report.stale);
            }
        }
        if let Some(d) = endpoint_diff.filter(|d| d.changed) {
            info!("{}: endpoints changed", port_name);
            report.endpoints_changed = true;
            self.port_mut(port)?.endpoints.invalidate(|id| d.keep.contains(id));
            for id in d.gone {
                self.retire_port(id, &mut report.stale);
            }
        }
        if let Some(d) = dport_diff.filter(|d| d.changed) {
            info!("{}: dports changed", port_name);
            report.dports_changed = true;
            self.port_mut(port)?.dports.invalidate(|id| d.keep.contains(id));
            for id in d.gone {
                self.dports.remove(id);
            }
        }
        if let Some(d) = decoder_diff.filter(|d| d.changed) {
            info!("{}: decoders changed", port_name);
            report.decoders_changed = true;
            self.port_mut(port)?.decoders.invalidate(|id| d.keep.contains(id));
            for id in d.gone {
                self.retire_decoder(id, &mut report.stale);
            }
        }
        for (decoder, d) in region_diffs {
            if !d.changed {
                continue;
            }
            for id in d.gone {
                self.stale_region(decoder, id, &mut report.stale);
            }
            let regions = &self.regions;
            let dec = self.decoders.get_mut(decoder);
            if let Some(dec) = dec {
                info!("{}: regions changed", dec.name);
                dec.regions.invalidate(|id| {
                    d.keep.contains(id) || regions.get(*id).is_some_and(|r| r.node.is_none())
                });
            }
        }
        Ok(report)
    }

    /// Re-read the memdev list. Memdevs that vanished or changed are dropped; ids held for
    /// them stop resolving. Returns the dropped ids.
    pub fn refresh_memdevs(&mut self) -> Result<Vec<MemdevId>> {
        if self.memdev_list.entries().is_empty() && !self.memdev_list.is_populated() {
            return Ok(Vec::new());
        }
        let fresh = dedup(self.enumerator.memdevs().map_err(enumeration_error)?);
        let current: Vec<_> = self
            .memdev_list
            .entries()
            .iter()
            .filter_map(|id| self.memdevs.get(*id).map(|m| (*id, &m.node)))
            .collect();
        let d = diff(&current, &fresh);
        if !d.changed {
            return Ok(Vec::new());
        }
        info!("memdevs changed, {} dropped", d.gone.len());
        self.memdev_list.invalidate(|id| d.keep.contains(id));
        for id in d.gone.iter() {
            self.memdevs.remove(*id);
        }
        Ok(d.gone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Error,
        record::Uuid,
        testing::{ROOT, ROOT_DECODER, WINDOW_START, context, region_node},
        topology::{DecodeState, RegionParams},
    };
    use alloc::{string::String, vec};

    fn local_params() -> RegionParams {
        RegionParams {
            uuid: Uuid([1; 16]),
            start: WINDOW_START + 0x1000_0000,
            size: 0x1000_0000,
            interleave_ways: 2,
            interleave_granularity: 256,
        }
    }

    #[test]
    fn test_unchanged_refresh_keeps_ids() {
        let mut ctx = context();
        let root = ctx.find_port_by_path(ROOT).unwrap().unwrap();
        let endpoints = ctx.endpoints(root).unwrap();
        let dec = ctx.decoders(root).unwrap()[0];
        let regions = ctx.decoder_regions(dec).unwrap();
        let local = ctx.create_region(dec, local_params()).unwrap();

        assert_eq!(ctx.refresh_port(root).unwrap(), RefreshReport::default());
        assert_eq!(ctx.endpoints(root).unwrap(), endpoints);
        assert_eq!(ctx.decoders(root).unwrap(), vec![dec]);
        assert_eq!(ctx.decoder_regions(dec).unwrap(), vec![regions[0], local]);
    }

    #[test]
    fn test_removed_decoder_makes_regions_stale() {
        let mut ctx = context();
        let root = ctx.find_port_by_path(ROOT).unwrap().unwrap();
        let dec = ctx.decoders(root).unwrap()[0];
        let enumerated = ctx.decoder_regions(dec).unwrap()[0];
        let local = ctx.create_region(dec, local_params()).unwrap();

        ctx.enumerator_mut()
            .decoders
            .insert(String::from(ROOT), Vec::new());
        let report = ctx.refresh_port(root).unwrap();
        assert!(report.decoders_changed);
        assert!(!report.dports_changed);
        assert_eq!(report.stale, vec![enumerated, local]);

        assert_eq!(ctx.commit_region(local), Err(Error::Stale));
        assert_eq!(ctx.reset_region(enumerated), Err(Error::Stale));
        assert_eq!(ctx.program_region(local, &[]), Err(Error::Stale));
        assert!(matches!(ctx.region_mappings(enumerated), Err(Error::Stale)));
        assert!(ctx.region(enumerated).unwrap().is_stale());
        assert!(ctx.decoder(dec).unwrap().is_removed());
        assert_eq!(
            ctx.decoder_stale_regions(dec).unwrap(),
            &[enumerated, local][..]
        );
        assert!(ctx.decoders(root).unwrap().is_empty());

        ctx.delete_region(enumerated).unwrap();
        assert!(ctx.decoder(dec).is_ok());
        ctx.delete_region(local).unwrap();
        assert_eq!(ctx.decoder(dec).map(|_| ()), Err(Error::NotFound));
    }

    #[test]
    fn test_retired_decoder_refuses_regions() {
        let mut ctx = context();
        let root = ctx.find_port_by_path(ROOT).unwrap().unwrap();
        let dec = ctx.decoders(root).unwrap()[0];
        let enumerated = ctx.decoder_regions(dec).unwrap()[0];
        ctx.enumerator_mut()
            .decoders
            .insert(String::from(ROOT), Vec::new());
        ctx.refresh_port(root).unwrap();

        assert_eq!(ctx.create_region(dec, local_params()), Err(Error::Stale));
        assert!(ctx.decoder_regions(dec).unwrap().is_empty());
        assert_eq!(ctx.decoder_stale_regions(dec).unwrap(), &[enumerated][..]);

        ctx.delete_region(enumerated).unwrap();
        assert_eq!(ctx.decoder(dec).map(|_| ()), Err(Error::NotFound));
        assert_eq!(ctx.create_region(dec, local_params()), Err(Error::NotFound));
    }

    #[test]
    fn test_changed_endpoint_is_replaced() {
        let mut ctx = context();
        let root = ctx.find_port_by_path(ROOT).unwrap().unwrap();
        let endpoints = ctx.endpoints(root).unwrap();
        let node = ctx.enumerator().endpoints[ROOT][1]
            .clone()
            .with("uport", "/pci/0000:00:01.0/host9");
        ctx.enumerator_mut().endpoints.get_mut(ROOT).unwrap()[1] = node;

        let report = ctx.refresh_port(root).unwrap();
        assert!(report.endpoints_changed);
        assert!(!report.decoders_changed);
        assert!(!ctx.port(root).unwrap().endpoints_populated());

        let again = ctx.endpoints(root).unwrap();
        assert_eq!(again[0], endpoints[0]);
        assert_ne!(again[1], endpoints[1]);
        assert_eq!(ctx.port(endpoints[1]).map(|_| ()), Err(Error::NotFound));
    }

    #[test]
    fn test_failed_refresh_changes_nothing() {
        let mut ctx = context();
        let root = ctx.find_port_by_path(ROOT).unwrap().unwrap();
        let dec = ctx.decoders(root).unwrap()[0];
        ctx.decoder_regions(dec).unwrap();
        ctx.enumerator_mut()
            .decoders
            .insert(String::from(ROOT), Vec::new());
        ctx.enumerator_mut().fail = true;

        assert!(matches!(ctx.refresh_port(root), Err(Error::Enumeration(_))));
        assert!(ctx.port(root).unwrap().decoders_populated());
        assert!(!ctx.decoder(dec).unwrap().is_removed());
        assert_eq!(ctx.decoders(root).unwrap(), vec![dec]);

        ctx.enumerator_mut().fail = false;
        assert!(ctx.refresh_port(root).unwrap().decoders_changed);
    }

    #[test]
    fn test_changed_region_goes_stale() {
        let mut ctx = context();
        let root = ctx.find_port_by_path(ROOT).unwrap().unwrap();
        let dec = ctx.decoders(root).unwrap()[0];
        let old = ctx.decoder_regions(dec).unwrap()[0];
        let extent = ctx.decoder_max_available_extent(dec).unwrap();
        ctx.enumerator_mut().regions.insert(
            String::from(ROOT_DECODER),
            vec![region_node(0, WINDOW_START, 0x1000_0000, "reset")],
        );

        let report = ctx.refresh_port(root).unwrap();
        assert!(!report.decoders_changed);
        assert_eq!(report.stale, vec![old]);
        assert!(ctx.region(old).unwrap().is_stale());

        let fresh = ctx.decoder_regions(dec).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_ne!(fresh[0], old);
        assert_eq!(ctx.region(fresh[0]).unwrap().decode_state, DecodeState::Reset);
        assert_eq!(ctx.decoder_max_available_extent(dec).unwrap(), extent);
        assert_eq!(ctx.decoder_stale_regions(dec).unwrap(), &[old][..]);

        ctx.delete_region(old).unwrap();
        assert!(ctx.decoder_stale_regions(dec).unwrap().is_empty());
        assert!(ctx.decoder(dec).is_ok());
    }

    #[test]
    fn test_refresh_memdevs() {
        let mut ctx = context();
        assert!(ctx.refresh_memdevs().unwrap().is_empty());
        let mems = ctx.memdevs().unwrap();
        ctx.enumerator_mut().memdevs.remove(0);

        assert_eq!(ctx.refresh_memdevs().unwrap(), vec![mems[0]]);
        assert!(ctx.memdev(mems[0]).is_err());
        assert_eq!(ctx.memdevs().unwrap(), vec![mems[1]]);
        assert!(ctx.refresh_memdevs().unwrap().is_empty());
    }
}
