//! crates/ce_core/src/context.rs
//! Per-region variable store and the cross-region view over all regions.
//!
//! Write discipline:
//! - builder writes (`insert`) overwrite freely; later steps win over raw data
//! - step writes (`write_output`) are single-writer within a step: the same
//!   output may not be written twice between two `begin_step` calls

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;

use crate::errors::CoreError;
use crate::ids::RegionCode;
use crate::value::Value;

#[derive(Clone, Debug, PartialEq)]
pub struct RegionContext {
    region: RegionCode,
    vars: BTreeMap<String, Value>,
    written_this_step: BTreeSet<String>,
}

impl RegionContext {
    pub fn new(region: RegionCode) -> Self {
        Self { region, vars: BTreeMap::new(), written_this_step: BTreeSet::new() }
    }

    pub fn region(&self) -> &RegionCode {
        &self.region
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Numeric view of `name`; `None` when absent or not coercible.
    pub fn get_number(&self, name: &str) -> Option<f64> {
        self.vars.get(name).and_then(Value::as_number)
    }

    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.vars.get(name).and_then(Value::as_text)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Builder-time write (raw fields, weights, carried outputs). Last writer wins.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Open a new step scope for `write_output`.
    pub fn begin_step(&mut self) {
        self.written_this_step.clear();
    }

    /// Step-time write. Overwrites values from earlier steps or raw data, but
    /// rejects a second write of the same name within the current step.
    pub fn write_output(&mut self, name: &str, value: Value) -> Result<(), CoreError> {
        if !self.written_this_step.insert(name.to_string()) {
            return Err(CoreError::DuplicateWrite {
                region: self.region.to_string(),
                name: name.to_string(),
            });
        }
        self.vars.insert(name.to_string(), value);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Insertion-ordered region → context map read by cross-region operations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CrossRegionDataset {
    regions: IndexMap<RegionCode, RegionContext>,
}

impl CrossRegionDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a region's context, keeping its first position.
    pub fn insert(&mut self, ctx: RegionContext) {
        self.regions.insert(ctx.region().clone(), ctx);
    }

    pub fn get(&self, region: &RegionCode) -> Option<&RegionContext> {
        self.regions.get(region)
    }

    pub fn get_mut(&mut self, region: &RegionCode) -> Option<&mut RegionContext> {
        self.regions.get_mut(region)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn codes(&self) -> impl Iterator<Item = &RegionCode> {
        self.regions.keys()
    }

    pub fn contexts(&self) -> impl Iterator<Item = &RegionContext> {
        self.regions.values()
    }

    pub fn contexts_mut(&mut self) -> impl Iterator<Item = &mut RegionContext> {
        self.regions.values_mut()
    }

    /// `(region, value)` for every region with a numeric value for `name`.
    pub fn values_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = (&'a RegionCode, f64)> + 'a {
        self.regions
            .iter()
            .filter_map(move |(code, ctx)| ctx.get_number(name).map(|v| (code, v)))
    }

    /// Numeric column for `name` across regions, skipping regions without it.
    pub fn column(&self, name: &str) -> Vec<f64> {
        self.values_of(name).map(|(_, v)| v).collect()
    }

    pub fn into_contexts(self) -> impl Iterator<Item = RegionContext> {
        self.regions.into_values()
    }
}

impl FromIterator<RegionContext> for CrossRegionDataset {
    fn from_iter<T: IntoIterator<Item = RegionContext>>(iter: T) -> Self {
        let mut ds = CrossRegionDataset::new();
        for ctx in iter {
            ds.insert(ctx);
        }
        ds
    }
}
