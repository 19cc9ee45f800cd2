use std::collections::{HashMap, HashSet};

use crate::sensors::SensorNode;

/// An ordered sequence of sensors scheduled together as one polling unit.
#[derive(Clone)]
pub struct ScanGroup {
    pub name: String,
    pub sensors: Vec<SensorNode>,
}

impl ScanGroup {
    pub fn keys(&self) -> Vec<&str> {
        self.sensors.iter().map(|s| s.key()).collect()
    }
}

/// Partitions a device subtree's flattened sensor set into scan groups.
///
/// Addressable sensors not pre-assigned to a named group are sorted by
/// `(device_address, address)` and chunked into anonymous groups whose
/// register span never exceeds `max_span`. Sensors the caller assigned to a
/// named group pass through under that name, but still participate in the
/// anonymous pass's span bookkeeping so they can bridge an address gap.
/// Readable non-addressable sensors collapse into one catch-all group.
///
/// The builder never fails: a sensor wider than `max_span` simply yields a
/// single oversized group and the scheduler falls back to unbatched reads
/// for it.
pub struct ScanGroupBuilder {
    max_span: u16,
    chunking_disabled: bool,
}

struct Run {
    device: u8,
    start: u16,
    watermark: u16,
    members: Vec<SensorNode>,
}

impl ScanGroupBuilder {
    pub fn new(max_span: u16, chunking_disabled: bool) -> Self {
        Self {
            max_span: max_span.max(1),
            chunking_disabled,
        }
    }

    /// `named` maps sensor key → explicit group name for every pre-assigned
    /// sensor. Every readable sensor of `sensors` lands in exactly one of
    /// the returned groups.
    pub fn build(
        &self,
        sensors: &[SensorNode],
        named: &HashMap<String, String>,
    ) -> Vec<ScanGroup> {
        let mut groups: Vec<ScanGroup> = Vec::new();
        let mut named_index: HashMap<String, usize> = HashMap::new();

        // Named groups pass through untouched, in first-appearance order.
        for node in sensors {
            if let Some(group_name) = named.get(node.key()) {
                let idx = *named_index.entry(group_name.clone()).or_insert_with(|| {
                    groups.push(ScanGroup {
                        name: group_name.clone(),
                        sensors: Vec::new(),
                    });
                    groups.len() - 1
                });
                groups[idx].sensors.push(node.clone());
            }
        }

        // Anonymous pass: addressable readable sensors in address order.
        // Named sensors stay in the iteration for the bridging rule only.
        let mut addressable: Vec<&SensorNode> = sensors
            .iter()
            .filter(|n| n.register().is_some_and(|r| r.access().is_readable()))
            .collect();
        addressable.sort_by_key(|n| {
            let reg = n.register().unwrap();
            (reg.device_address(), reg.address())
        });

        let mut finished: Vec<Run> = Vec::new();
        let mut run: Option<Run> = None;

        for node in addressable {
            let reg = node.register().unwrap();

            if named.contains_key(node.key()) {
                // A sensor claimed by a named group may transparently bridge
                // a gap for the anonymous pass, as long as it lies within
                // the running window and keeps the span within the limit.
                if !self.chunking_disabled {
                    if let Some(r) = run.as_mut() {
                        if reg.device_address() == r.device
                            && reg.address() <= r.watermark
                            && reg.end_address().saturating_sub(r.start) <= self.max_span
                        {
                            r.watermark = r.watermark.max(reg.end_address());
                        }
                    }
                }
                continue;
            }

            let needs_new = match &run {
                None => true,
                Some(r) => {
                    self.chunking_disabled
                        || reg.device_address() != r.device
                        || reg.address() > r.watermark
                        || reg.end_address().saturating_sub(r.start) > self.max_span
                }
            };

            if needs_new {
                Self::close(run.take(), &mut finished);
                if reg.is_reserved() {
                    // A reserved placeholder never opens a group.
                    continue;
                }
                run = Some(Run {
                    device: reg.device_address(),
                    start: reg.address(),
                    watermark: reg.end_address(),
                    members: vec![node.clone()],
                });
            } else if let Some(r) = run.as_mut() {
                r.members.push(node.clone());
                r.watermark = r.watermark.max(reg.end_address());
            }
        }
        Self::close(run.take(), &mut finished);

        let mut used: HashSet<String> = groups.iter().map(|g| g.name.clone()).collect();
        for r in finished {
            let base = format!("scan-{}-{}", r.device, r.start);
            let mut name = base.clone();
            let mut suffix = 1;
            while used.contains(&name) {
                suffix += 1;
                name = format!("{}-{}", base, suffix);
            }
            used.insert(name.clone());
            groups.push(ScanGroup {
                name,
                sensors: r.members,
            });
        }

        // Remaining readable non-addressable sensors (derived, accumulation)
        // collapse into one synthetic catch-all group.
        let virtuals: Vec<SensorNode> = sensors
            .iter()
            .filter(|n| !n.is_addressable() && n.is_readable() && !named.contains_key(n.key()))
            .cloned()
            .collect();
        if !virtuals.is_empty() {
            groups.push(ScanGroup {
                name: "virtual".to_string(),
                sensors: virtuals,
            });
        }

        groups
    }

    fn close(run: Option<Run>, finished: &mut Vec<Run>) {
        if let Some(mut r) = run {
            // Trailing reserved placeholders never close a group.
            while r
                .members
                .last()
                .is_some_and(|s| s.register().unwrap().is_reserved())
            {
                r.members.pop();
            }
            if !r.members.is_empty() {
                finished.push(r);
            }
        }
    }
}
