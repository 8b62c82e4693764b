//! crates/ce_io/src/records.rs
//! Raw indicator records.
//!
//! Three shapes: township survey rows, community capacity rows, and raw
//! `regionCode + field map` rows. Survey and community rows are exposed
//! through static `FieldSpec` tables: each entry names the field in camelCase
//! and snake_case (plus legacy aliases) and carries a plain accessor fn. No
//! reflection, and the table order is the exposure order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Scalar as it appeared on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(f64),
    Text(String),
}

/// How the context builder should treat a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    /// Yes/no indicator; canonicalized to `是` / `否`.
    Flag,
    /// Risk-assessment level; any of `低/中/高` means an assessment exists.
    RiskLevel,
}

/// One row of a static field table.
pub struct FieldSpec<R> {
    pub camel: &'static str,
    pub snake: &'static str,
    pub aliases: &'static [&'static str],
    pub kind: FieldKind,
    pub get: fn(&R) -> Option<Scalar>,
}

impl<R> FieldSpec<R> {
    /// All variable names this field is exposed under, deduplicated.
    pub fn names(&self) -> Vec<String> {
        let mut out = vec![self.camel.to_string()];
        for n in std::iter::once(&self.snake).chain(self.aliases.iter()) {
            if !out.iter().any(|o| o == n) {
                out.push((*n).to_string());
            }
        }
        out
    }
}

/// A present field with every name it should be visible under.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordField {
    pub names: Vec<String>,
    pub kind: FieldKind,
    pub value: Scalar,
}

/// Read-only access the context builder needs from any record shape.
pub trait IndicatorRecord {
    fn region_code(&self) -> &str;
    /// Present fields, in exposure order.
    fn fields(&self) -> Vec<RecordField>;
}

fn from_table<R>(table: &[FieldSpec<R>], r: &R) -> Vec<RecordField> {
    table
        .iter()
        .filter_map(|spec| {
            (spec.get)(r).map(|value| RecordField { names: spec.names(), kind: spec.kind, value })
        })
        .collect()
}

fn num(v: Option<f64>) -> Option<Scalar> {
    v.map(Scalar::Number)
}

fn text(v: &Option<String>) -> Option<Scalar> {
    v.clone().map(Scalar::Text)
}

// ----- township survey -----

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyRecord {
    #[serde(alias = "region_code")]
    pub region_code: String,
    #[serde(default)]
    pub province: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub county: Option<String>,
    #[serde(default)]
    pub township: Option<String>,
    #[serde(default)]
    pub population: Option<f64>,
    #[serde(default, alias = "management_staff")]
    pub management_staff: Option<f64>,
    #[serde(default, alias = "risk_assessment")]
    pub risk_assessment: Option<Scalar>,
    #[serde(default, alias = "funding_amount")]
    pub funding_amount: Option<f64>,
    #[serde(default, alias = "material_value")]
    pub material_value: Option<f64>,
    #[serde(default, alias = "hospital_beds")]
    pub hospital_beds: Option<f64>,
    #[serde(default)]
    pub firefighters: Option<f64>,
    #[serde(default)]
    pub volunteers: Option<f64>,
    #[serde(default, alias = "militia_reserve")]
    pub militia_reserve: Option<f64>,
    #[serde(default, alias = "training_participants")]
    pub training_participants: Option<f64>,
    #[serde(default, alias = "shelter_capacity")]
    pub shelter_capacity: Option<f64>,
}

pub static SURVEY_FIELDS: &[FieldSpec<SurveyRecord>] = &[
    FieldSpec { camel: "regionCode", snake: "region_code", aliases: &[], kind: FieldKind::Text, get: |r| Some(Scalar::Text(r.region_code.clone())) },
    FieldSpec { camel: "province", snake: "province", aliases: &[], kind: FieldKind::Text, get: |r| text(&r.province) },
    FieldSpec { camel: "city", snake: "city", aliases: &[], kind: FieldKind::Text, get: |r| text(&r.city) },
    FieldSpec { camel: "county", snake: "county", aliases: &[], kind: FieldKind::Text, get: |r| text(&r.county) },
    FieldSpec { camel: "township", snake: "township", aliases: &["townshipName"], kind: FieldKind::Text, get: |r| text(&r.township) },
    FieldSpec { camel: "population", snake: "population", aliases: &[], kind: FieldKind::Number, get: |r| num(r.population) },
    FieldSpec { camel: "managementStaff", snake: "management_staff", aliases: &[], kind: FieldKind::Number, get: |r| num(r.management_staff) },
    FieldSpec { camel: "riskAssessment", snake: "risk_assessment", aliases: &[], kind: FieldKind::RiskLevel, get: |r| r.risk_assessment.clone() },
    FieldSpec { camel: "fundingAmount", snake: "funding_amount", aliases: &[], kind: FieldKind::Number, get: |r| num(r.funding_amount) },
    FieldSpec { camel: "materialValue", snake: "material_value", aliases: &[], kind: FieldKind::Number, get: |r| num(r.material_value) },
    FieldSpec { camel: "hospitalBeds", snake: "hospital_beds", aliases: &[], kind: FieldKind::Number, get: |r| num(r.hospital_beds) },
    FieldSpec { camel: "firefighters", snake: "firefighters", aliases: &[], kind: FieldKind::Number, get: |r| num(r.firefighters) },
    FieldSpec { camel: "volunteers", snake: "volunteers", aliases: &[], kind: FieldKind::Number, get: |r| num(r.volunteers) },
    FieldSpec { camel: "militiaReserve", snake: "militia_reserve", aliases: &[], kind: FieldKind::Number, get: |r| num(r.militia_reserve) },
    FieldSpec { camel: "trainingParticipants", snake: "training_participants", aliases: &[], kind: FieldKind::Number, get: |r| num(r.training_participants) },
    FieldSpec { camel: "shelterCapacity", snake: "shelter_capacity", aliases: &[], kind: FieldKind::Number, get: |r| num(r.shelter_capacity) },
];

impl IndicatorRecord for SurveyRecord {
    fn region_code(&self) -> &str {
        &self.region_code
    }

    fn fields(&self) -> Vec<RecordField> {
        from_table(SURVEY_FIELDS, self)
    }
}

// ----- community capacity -----

/// Community capacity row. Missing counts and amounts read as `0`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityRecord {
    #[serde(alias = "region_code")]
    pub region_code: String,
    #[serde(default, alias = "province_name")]
    pub province_name: Option<String>,
    #[serde(default, alias = "city_name")]
    pub city_name: Option<String>,
    #[serde(default, alias = "county_name")]
    pub county_name: Option<String>,
    #[serde(default, alias = "township_name")]
    pub township_name: Option<String>,
    #[serde(default, alias = "community_name")]
    pub community_name: Option<String>,
    #[serde(default, alias = "has_emergency_plan")]
    pub has_emergency_plan: Option<Scalar>,
    #[serde(default, alias = "has_vulnerable_groups_list")]
    pub has_vulnerable_groups_list: Option<Scalar>,
    #[serde(default, alias = "has_disaster_points_list")]
    pub has_disaster_points_list: Option<Scalar>,
    #[serde(default, alias = "has_disaster_map")]
    pub has_disaster_map: Option<Scalar>,
    #[serde(default, alias = "resident_population")]
    pub resident_population: f64,
    #[serde(default, alias = "last_year_funding_amount")]
    pub last_year_funding_amount: f64,
    #[serde(default, alias = "materials_equipment_value")]
    pub materials_equipment_value: f64,
    #[serde(default, alias = "medical_service_count")]
    pub medical_service_count: f64,
    #[serde(default, alias = "militia_reserve_count")]
    pub militia_reserve_count: f64,
    #[serde(default, alias = "registered_volunteer_count")]
    pub registered_volunteer_count: f64,
    #[serde(default, alias = "last_year_training_participants")]
    pub last_year_training_participants: f64,
    #[serde(default, alias = "last_year_drill_participants")]
    pub last_year_drill_participants: f64,
    #[serde(default, alias = "emergency_shelter_capacity")]
    pub emergency_shelter_capacity: f64,
}

pub static COMMUNITY_FIELDS: &[FieldSpec<CommunityRecord>] = &[
    FieldSpec { camel: "regionCode", snake: "region_code", aliases: &[], kind: FieldKind::Text, get: |r| Some(Scalar::Text(r.region_code.clone())) },
    FieldSpec { camel: "provinceName", snake: "province_name", aliases: &["province"], kind: FieldKind::Text, get: |r| text(&r.province_name) },
    FieldSpec { camel: "cityName", snake: "city_name", aliases: &["city"], kind: FieldKind::Text, get: |r| text(&r.city_name) },
    FieldSpec { camel: "countyName", snake: "county_name", aliases: &["county"], kind: FieldKind::Text, get: |r| text(&r.county_name) },
    FieldSpec { camel: "townshipName", snake: "township_name", aliases: &["township"], kind: FieldKind::Text, get: |r| text(&r.township_name) },
    FieldSpec { camel: "communityName", snake: "community_name", aliases: &["community"], kind: FieldKind::Text, get: |r| text(&r.community_name) },
    FieldSpec { camel: "hasEmergencyPlan", snake: "has_emergency_plan", aliases: &[], kind: FieldKind::Flag, get: |r| r.has_emergency_plan.clone() },
    FieldSpec { camel: "hasVulnerableGroupsList", snake: "has_vulnerable_groups_list", aliases: &[], kind: FieldKind::Flag, get: |r| r.has_vulnerable_groups_list.clone() },
    FieldSpec { camel: "hasDisasterPointsList", snake: "has_disaster_points_list", aliases: &[], kind: FieldKind::Flag, get: |r| r.has_disaster_points_list.clone() },
    FieldSpec { camel: "hasDisasterMap", snake: "has_disaster_map", aliases: &[], kind: FieldKind::Flag, get: |r| r.has_disaster_map.clone() },
    FieldSpec { camel: "residentPopulation", snake: "resident_population", aliases: &["population"], kind: FieldKind::Number, get: |r| num(Some(r.resident_population)) },
    FieldSpec { camel: "lastYearFundingAmount", snake: "last_year_funding_amount", aliases: &["fundingAmount", "funding_amount"], kind: FieldKind::Number, get: |r| num(Some(r.last_year_funding_amount)) },
    FieldSpec { camel: "materialsEquipmentValue", snake: "materials_equipment_value", aliases: &["materialValue", "material_value"], kind: FieldKind::Number, get: |r| num(Some(r.materials_equipment_value)) },
    FieldSpec { camel: "medicalServiceCount", snake: "medical_service_count", aliases: &[], kind: FieldKind::Number, get: |r| num(Some(r.medical_service_count)) },
    FieldSpec { camel: "militiaReserveCount", snake: "militia_reserve_count", aliases: &["militiaReserve", "militia_reserve"], kind: FieldKind::Number, get: |r| num(Some(r.militia_reserve_count)) },
    FieldSpec { camel: "registeredVolunteerCount", snake: "registered_volunteer_count", aliases: &["volunteers"], kind: FieldKind::Number, get: |r| num(Some(r.registered_volunteer_count)) },
    FieldSpec { camel: "lastYearTrainingParticipants", snake: "last_year_training_participants", aliases: &["trainingParticipants", "training_participants"], kind: FieldKind::Number, get: |r| num(Some(r.last_year_training_participants)) },
    FieldSpec { camel: "lastYearDrillParticipants", snake: "last_year_drill_participants", aliases: &["drillParticipants"], kind: FieldKind::Number, get: |r| num(Some(r.last_year_drill_participants)) },
    FieldSpec { camel: "emergencyShelterCapacity", snake: "emergency_shelter_capacity", aliases: &["shelterCapacity", "shelter_capacity"], kind: FieldKind::Number, get: |r| num(Some(r.emergency_shelter_capacity)) },
];

impl IndicatorRecord for CommunityRecord {
    fn region_code(&self) -> &str {
        &self.region_code
    }

    fn fields(&self) -> Vec<RecordField> {
        from_table(COMMUNITY_FIELDS, self)
    }
}

// ----- raw field map -----

/// `regionCode` plus arbitrary scalar fields. Nulls are dropped.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "regionCode", alias = "region_code")]
    pub region_code: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Option<Scalar>>,
}

impl IndicatorRecord for RawRecord {
    fn region_code(&self) -> &str {
        &self.region_code
    }

    fn fields(&self) -> Vec<RecordField> {
        self.fields
            .iter()
            .filter_map(|(k, v)| {
                let value = v.clone()?;
                let kind = match value {
                    Scalar::Number(_) => FieldKind::Number,
                    Scalar::Bool(_) => FieldKind::Flag,
                    Scalar::Text(_) => FieldKind::Text,
                };
                let mut names = vec![k.clone()];
                if let Some(other) = other_case(k) {
                    names.push(other);
                }
                Some(RecordField { names, kind, value })
            })
            .collect()
    }
}

/// The camelCase ↔ snake_case twin of `name`, when `name` is clearly one or the other.
pub fn other_case(name: &str) -> Option<String> {
    let first_lower = name.chars().next().is_some_and(|c| c.is_ascii_lowercase());
    if !first_lower || !name.is_ascii() {
        return None;
    }
    if name.contains('_') {
        if name.chars().any(|c| c.is_ascii_uppercase()) {
            return None;
        }
        let mut out = String::with_capacity(name.len());
        let mut upper = false;
        for c in name.chars() {
            if c == '_' {
                upper = true;
            } else if upper {
                out.push(c.to_ascii_uppercase());
                upper = false;
            } else {
                out.push(c);
            }
        }
        return Some(out);
    }
    if name.chars().any(|c| c.is_ascii_uppercase()) {
        let mut out = String::with_capacity(name.len() + 4);
        for c in name.chars() {
            if c.is_ascii_uppercase() {
                out.push('_');
                out.push(c.to_ascii_lowercase());
            } else {
                out.push(c);
            }
        }
        return Some(out);
    }
    None
}

// ----- record file -----

/// Records file: `{"kind": "survey"|"community"|"raw", "records": [...]}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "records", rename_all = "snake_case")]
pub enum RecordSet {
    Survey(Vec<SurveyRecord>),
    Community(Vec<CommunityRecord>),
    Raw(Vec<RawRecord>),
}

impl RecordSet {
    pub fn kind(&self) -> &'static str {
        match self {
            RecordSet::Survey(_) => "survey",
            RecordSet::Community(_) => "community",
            RecordSet::Raw(_) => "raw",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RecordSet::Survey(v) => v.len(),
            RecordSet::Community(v) => v.len(),
            RecordSet::Raw(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records in file order, behind the common trait.
    pub fn records(&self) -> Vec<&dyn IndicatorRecord> {
        match self {
            RecordSet::Survey(v) => v.iter().map(|r| r as &dyn IndicatorRecord).collect(),
            RecordSet::Community(v) => v.iter().map(|r| r as &dyn IndicatorRecord).collect(),
            RecordSet::Raw(v) => v.iter().map(|r| r as &dyn IndicatorRecord).collect(),
        }
    }
}
