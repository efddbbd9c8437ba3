//! Three-phase reconstruction.
//!
//! Series such as `Ac.L1.Power`, `Ac.L2.Power` and `Ac.L3.Power` of the same
//! device are one logical measurement split across phases. Once all three
//! phases of a group have been seen inside the current flush window a
//! synthetic `Ac.Lx.Power` point is emitted next to the originals. Additive
//! kinds are summed, voltages are averaged.

use crate::point::{Point, SeriesKey};
use std::collections::HashMap;

/// Phase tokens in the order they are looked up.
pub const PHASE_TOKENS: [&str; 3] = ["L1", "L2", "L3"];

/// Measurement kinds that take part in aggregation.
pub const AGGREGATED_KINDS: [&str; 7] = ["Power", "Current", "Voltage", "Energy", "I", "P", "V"];

/// Token replacing the phase in synthesized series names.
pub const COMBINED_TOKEN: &str = "Lx";

/// Series key with the phase replaced by `Lx`, plus the measurement kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhaseGroupKey {
    pub series: SeriesKey,
    pub kind: String,
}

/// Where the phase sits in a series name and what it measures.
#[derive(Debug, Clone, PartialEq)]
struct PhaseSlot<'a> {
    position: usize,
    phase: usize,
    kind: &'a str,
}

/// Finds the phase token in the dot-separated `parts`.
///
/// Tokens are searched in `L1`, `L2`, `L3` order, each at its first
/// occurrence, and the last token found wins.
fn locate<'a>(parts: &[&'a str]) -> Option<PhaseSlot<'a>> {
    let mut found = None;
    for (phase, token) in PHASE_TOKENS.iter().enumerate() {
        if let Some(position) = parts.iter().position(|p| p == token) {
            found = Some((position, phase));
        }
    }
    let (position, phase) = found?;
    let kind = *parts.get(position + 1)?;
    Some(PhaseSlot { position, phase, kind })
}

fn is_averaged(kind: &str) -> bool {
    kind == "Voltage" || kind == "V"
}

/// Per-window phase accumulator. Owned by the batcher and reset on every
/// flush, so partial groups never outlive their window.
#[derive(Debug, Default)]
pub struct PhaseAggregator {
    groups: HashMap<PhaseGroupKey, [Option<Point>; 3]>,
}

impl PhaseAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `point` and returns it together with the synthetic `Lx` point
    /// if this point completed its group.
    pub fn observe(&mut self, point: Point) -> (Point, Option<Point>) {
        let synthetic = self.accumulate(&point);
        (point, synthetic)
    }

    /// Number of groups still waiting for phases.
    pub fn pending_groups(&self) -> usize {
        self.groups.len()
    }

    /// Discards all partial groups.
    pub fn reset(&mut self) {
        self.groups.clear();
    }

    fn accumulate(&mut self, point: &Point) -> Option<Point> {
        point.value()?;

        let mut parts: Vec<&str> = point.series_name.split('.').collect();
        let slot = locate(&parts)?;
        if !AGGREGATED_KINDS.contains(&slot.kind) {
            return None;
        }

        let kind = slot.kind.to_string();
        parts[slot.position] = COMBINED_TOKEN;
        let combined_name = parts.join(".");
        let key = PhaseGroupKey {
            series: SeriesKey::new(&combined_name, &point.tags),
            kind,
        };

        let members = self.groups.entry(key.clone()).or_default();
        members[slot.phase] = Some(point.clone());
        if members.iter().any(Option::is_none) {
            return None;
        }

        let members = self.groups.remove(&key)?;
        let sum: f64 = members.iter().flatten().filter_map(Point::value).sum();
        let value = if is_averaged(&key.kind) { sum / 3.0 } else { sum };

        Some(Point::numeric(combined_name, point.tags.clone(), point.timestamp, value))
    }
}
