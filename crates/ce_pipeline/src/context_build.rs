//! crates/ce_pipeline/src/context_build.rs
//! Region contexts from raw records.
//!
//! A context holds every record field under each of its names, the
//! `weight_<code>` variables, and `currentRegionCode`. Flag-like fields are
//! canonicalized to `是` / `否` so formulas see one truthy form regardless of
//! how the source spelled it. Records are only read.

use std::collections::BTreeMap;

use ce_core::rounding::round_to;
use ce_core::value::{truthy_token, NO, YES};
use ce_core::{CoreError, CrossRegionDataset, RegionCode, RegionContext, Value};
use ce_io::records::{FieldKind, IndicatorRecord, RecordSet, Scalar};

use crate::plan::ModelPlan;

pub const CURRENT_REGION_VAR: &str = "currentRegionCode";
pub const WEIGHT_PREFIX: &str = "weight_";

const RISK_LEVELS: &[&str] = &["低", "中", "高"];

/// Built contexts for every input region, in record order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RegionInputs {
    dataset: CrossRegionDataset,
}

impl RegionInputs {
    pub fn from_dataset(dataset: CrossRegionDataset) -> Self {
        Self { dataset }
    }

    /// Contexts for `records` with the plan's weights and declared indicators.
    pub fn from_records(records: &RecordSet, plan: &ModelPlan) -> Result<Self, CoreError> {
        build_dataset(records, &plan.weights, &plan.indicators).map(Self::from_dataset)
    }

    pub fn dataset(&self) -> &CrossRegionDataset {
        &self.dataset
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn into_dataset(self) -> CrossRegionDataset {
        self.dataset
    }
}

/// Canonical context value for a wire scalar of the given kind.
pub fn canonical_value(kind: FieldKind, value: &Scalar) -> Value {
    match (kind, value) {
        (_, Scalar::Bool(b)) if kind != FieldKind::Number => Value::from(*b),
        (_, Scalar::Bool(b)) => Value::Number(if *b { 1.0 } else { 0.0 }),
        (FieldKind::Flag | FieldKind::RiskLevel, Scalar::Number(n)) => Value::from(*n != 0.0 && !n.is_nan()),
        (_, Scalar::Number(n)) => Value::Number(*n),
        (FieldKind::RiskLevel, Scalar::Text(s)) if RISK_LEVELS.contains(&s.trim()) => Value::from(YES),
        (FieldKind::Flag | FieldKind::RiskLevel, Scalar::Text(s)) => match truthy_token(s) {
            Some(true) => Value::from(YES),
            Some(false) => Value::from(NO),
            None => Value::Text(s.clone()),
        },
        (FieldKind::Number, Scalar::Text(s)) => match s.trim().parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => Value::Text(s.clone()),
        },
        (FieldKind::Text, Scalar::Text(s)) => Value::Text(s.clone()),
    }
}

/// One region's context: record fields, weights, region code, then `prior`
/// outputs on top (earlier step results beat raw fields of the same name).
pub fn build_region_context(
    record: &dyn IndicatorRecord,
    weights: &BTreeMap<String, f64>,
    indicators: &[String],
    prior: &BTreeMap<String, Value>,
) -> Result<RegionContext, CoreError> {
    let code: RegionCode = record.region_code().trim().parse()?;
    let mut ctx = RegionContext::new(code.clone());

    for field in record.fields() {
        let value = canonical_value(field.kind, &field.value);
        for name in &field.names {
            ctx.insert(name.clone(), value.clone());
        }
    }

    for ind in indicators {
        ctx.insert(format!("{WEIGHT_PREFIX}{ind}"), 0.0);
    }
    for (ind, w) in weights {
        ctx.insert(format!("{WEIGHT_PREFIX}{ind}"), *w);
    }
    ctx.insert(CURRENT_REGION_VAR, code.as_str());

    for (name, value) in prior {
        ctx.insert(name.clone(), value.clone());
    }
    Ok(ctx)
}

/// Contexts for a whole record set. A repeated region code replaces the
/// earlier record's context but keeps its position.
pub fn build_dataset(
    records: &RecordSet,
    weights: &BTreeMap<String, f64>,
    indicators: &[String],
) -> Result<CrossRegionDataset, CoreError> {
    let empty = BTreeMap::new();
    let mut ds = CrossRegionDataset::new();
    for record in records.records() {
        let ctx = build_region_context(record, weights, indicators, &empty)?;
        if ds.get(ctx.region()).is_some() {
            tracing::warn!(region = %ctx.region(), "duplicate region record; later record wins");
        }
        ds.insert(ctx);
    }
    tracing::info!(kind = records.kind(), regions = ds.len(), "region contexts built");
    Ok(ds)
}

// ----- community → township inputs -----

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Township-level inputs derived from one community's capacity fields.
///
/// Population at or below zero is treated as 1 so the per-capita figures stay
/// finite. Flag fields read through their numeric view (`是` → 1).
pub fn derive_township_inputs(ctx: &RegionContext, scale: u32) -> Vec<(&'static str, f64)> {
    let n = |name: &str| ctx.get_number(name).filter(|v| v.is_finite()).unwrap_or(0.0);
    let pop = match n("resident_population") {
        p if p <= 0.0 => 1.0,
        p => p,
    };

    let derived = [
        ("PLAN_CONSTRUCTION", clamp01(n("has_emergency_plan"))),
        (
            "HAZARD_INSPECTION",
            clamp01((n("has_vulnerable_groups_list") + n("has_disaster_points_list")) / 2.0),
        ),
        ("RISK_ASSESSMENT", clamp01(n("has_disaster_map"))),
        ("FINANCIAL_INPUT", n("last_year_funding_amount") / pop * 10_000.0),
        ("MATERIAL_RESERVE", n("materials_equipment_value") / pop * 10_000.0),
        ("MEDICAL_SUPPORT", n("medical_service_count") / pop * 10_000.0),
        (
            "SELF_MUTUAL_AID",
            (n("militia_reserve_count") + n("registered_volunteer_count")) / pop * 10_000.0,
        ),
        (
            "PUBLIC_EVACUATION",
            (n("last_year_training_participants") + n("last_year_drill_participants")) / pop * 100.0,
        ),
        ("RELOCATION_SHELTER", n("emergency_shelter_capacity") / pop),
    ];
    derived.into_iter().map(|(k, v)| (k, round_to(v, scale))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ce_io::records::{CommunityRecord, RawRecord};

    #[test]
    fn flags_and_risk_levels_are_canonicalized() {
        assert_eq!(canonical_value(FieldKind::RiskLevel, &Scalar::Text("中".into())), Value::from(YES));
        assert_eq!(canonical_value(FieldKind::RiskLevel, &Scalar::Text("无".into())), Value::from(NO));
        assert_eq!(canonical_value(FieldKind::Flag, &Scalar::Bool(false)), Value::from(NO));
        assert_eq!(canonical_value(FieldKind::Flag, &Scalar::Text("Yes".into())), Value::from(YES));
        assert_eq!(canonical_value(FieldKind::Flag, &Scalar::Number(2.0)), Value::from(YES));
        assert_eq!(canonical_value(FieldKind::Number, &Scalar::Text("12".into())), Value::Number(12.0));
        assert_eq!(canonical_value(FieldKind::Number, &Scalar::Bool(true)), Value::Number(1.0));
        assert_eq!(canonical_value(FieldKind::Text, &Scalar::Text("青山镇".into())), Value::from("青山镇"));
    }

    #[test]
    fn context_has_names_weights_and_prior_outputs() {
        let rec: RawRecord =
            serde_json::from_str(r#"{"regionCode":"R1","teamSize":4,"score":0.1,"hasPlan":true}"#).unwrap();
        let weights: BTreeMap<String, f64> = [("A".to_string(), 0.4)].into_iter().collect();
        let prior: BTreeMap<String, Value> = [("score".to_string(), Value::Number(0.9))].into_iter().collect();
        let ctx = build_region_context(&rec, &weights, &["A".into(), "B".into()], &prior).unwrap();

        assert_eq!(ctx.get_number("teamSize"), Some(4.0));
        assert_eq!(ctx.get_number("team_size"), Some(4.0));
        assert_eq!(ctx.get_text("has_plan"), Some(YES));
        assert_eq!(ctx.get_number("weight_A"), Some(0.4));
        assert_eq!(ctx.get_number("weight_B"), Some(0.0));
        assert_eq!(ctx.get_text(CURRENT_REGION_VAR), Some("R1"));
        assert_eq!(ctx.get_number("score"), Some(0.9));
        // the record itself is untouched
        assert_eq!(rec.fields.len(), 3);
    }

    #[test]
    fn duplicate_region_codes_keep_first_position() {
        let set: RecordSet = serde_json::from_str(
            r#"{"kind":"raw","records":[{"regionCode":"A","v":1},{"regionCode":"B","v":2},{"regionCode":"A","v":3}]}"#,
        )
        .unwrap();
        let ds = build_dataset(&set, &BTreeMap::new(), &[]).unwrap();
        let order: Vec<&str> = ds.codes().map(|c| c.as_str()).collect();
        assert_eq!(order, vec!["A", "B"]);
        assert_eq!(ds.column("v"), vec![3.0, 2.0]);
    }

    #[test]
    fn township_inputs_are_per_capita() {
        let rec: CommunityRecord = serde_json::from_str(
            r#"{"regionCode":"C1","townshipName":"青山镇","hasEmergencyPlan":"是",
                "hasVulnerableGroupsList":"是","hasDisasterPointsList":"否","hasDisasterMap":false,
                "residentPopulation":2000,"lastYearFundingAmount":50000,"materialsEquipmentValue":3000,
                "medicalServiceCount":3,"militiaReserveCount":10,"registeredVolunteerCount":30,
                "lastYearTrainingParticipants":150,"lastYearDrillParticipants":50,
                "emergencyShelterCapacity":500}"#,
        )
        .unwrap();
        let ctx = build_region_context(&rec, &BTreeMap::new(), &[], &BTreeMap::new()).unwrap();
        let d: BTreeMap<&str, f64> = derive_township_inputs(&ctx, 8).into_iter().collect();
        assert_eq!(d["PLAN_CONSTRUCTION"], 1.0);
        assert_eq!(d["HAZARD_INSPECTION"], 0.5);
        assert_eq!(d["RISK_ASSESSMENT"], 0.0);
        assert_eq!(d["FINANCIAL_INPUT"], 250_000.0);
        assert_eq!(d["MATERIAL_RESERVE"], 15_000.0);
        assert_eq!(d["MEDICAL_SUPPORT"], 15.0);
        assert_eq!(d["SELF_MUTUAL_AID"], 200.0);
        assert_eq!(d["PUBLIC_EVACUATION"], 10.0);
        assert_eq!(d["RELOCATION_SHELTER"], 0.25);
    }

    #[test]
    fn zero_population_counts_as_one() {
        let rec: CommunityRecord =
            serde_json::from_str(r#"{"regionCode":"C2","lastYearFundingAmount":7}"#).unwrap();
        let ctx = build_region_context(&rec, &BTreeMap::new(), &[], &BTreeMap::new()).unwrap();
        let d: BTreeMap<&str, f64> = derive_township_inputs(&ctx, 8).into_iter().collect();
        assert_eq!(d["FINANCIAL_INPUT"], 70_000.0);
        assert_eq!(d["PLAN_CONSTRUCTION"], 0.0);
    }
}
