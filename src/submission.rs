//! Client payloads and their coercion into [`Unit`] records.
//!
//! The registration page has gone through several payload shapes over time: a flat
//! `measurements` list of `[category, width, height]` tuples, per-category lists of
//! `{largura, comprimento, area}` objects, and a form post carrying the list as a JSON
//! string. All of them are accepted here and reduced to one canonical measurement type.
//! Entries that cannot be coerced are kept as [`MalformedMeasurement`]s instead of failing
//! the whole submission.

use chrono::{Local, NaiveDate, Utc};
use log::warn;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::error::{RegistryError, Result};
use crate::model::{
    Dimension, Facilities, FlooringType, MalformedMeasurement, Measurement, MeasurementCategory,
    MeasurementEntry, Unit, WallType,
};

/// Largest difference between a client-supplied area and width × height that is still
/// stored as given. The browser form rounds the area to two decimals.
const AREA_TOLERANCE: f64 = 0.01;

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d/%m/%Y"];

/// JSON unit payload.
///
/// Field names are English, the Portuguese names used by the registration page are
/// accepted as aliases.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnitSubmission {
    #[serde(default, alias = "unidade", alias = "unidade_nome", alias = "nome")]
    pub name: String,

    #[serde(default, alias = "data")]
    pub registration_date: Option<String>,

    #[serde(default, alias = "responsavel")]
    pub responsible: String,

    #[serde(default, alias = "numero_funcionarios", alias = "funcionarios")]
    pub employee_count: Option<Value>,

    #[serde(
        default,
        alias = "tipos_piso",
        alias = "tipos_piso_selecionados",
        deserialize_with = "string_list"
    )]
    pub flooring: Vec<String>,

    #[serde(
        default,
        alias = "tipos_parede",
        alias = "tipos_parede_selecionados",
        deserialize_with = "string_list"
    )]
    pub walls: Vec<String>,

    #[serde(default, alias = "possui_estacionamento", deserialize_with = "flag")]
    pub has_parking: bool,

    #[serde(default, alias = "estacionamento_coberto", deserialize_with = "flag")]
    pub covered_parking: bool,

    #[serde(default, alias = "possui_gramado", deserialize_with = "flag")]
    pub has_lawn: bool,

    #[serde(default, alias = "possui_sala_curativo", deserialize_with = "flag")]
    pub has_first_aid_room: bool,

    #[serde(default, alias = "possui_sala_vacinacao", deserialize_with = "flag")]
    pub has_vaccination_room: bool,

    #[serde(default, alias = "possui_vidros_altos", deserialize_with = "flag")]
    pub has_high_glass: bool,

    #[serde(default, alias = "vidros_perigo", deserialize_with = "flag")]
    pub high_glass_danger: bool,

    #[serde(default, alias = "observacoes_gerais", alias = "observacoes")]
    pub notes: String,

    /// A list of measurements, or a JSON string holding one.
    #[serde(default, alias = "medidas", alias = "medidas_dinamicas")]
    pub measurements: Value,

    #[serde(default)]
    pub medidas_vidros: Value,
    #[serde(default)]
    pub medidas_sanitarios: Value,
    #[serde(default)]
    pub medidas_internas: Value,
    #[serde(default)]
    pub medidas_externas: Value,
}

/// [`UnitSubmission`] together with the locality it belongs to.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmissionEnvelope {
    #[serde(default, alias = "localidade", alias = "localidade_nome")]
    pub locality: String,

    #[serde(flatten)]
    pub unit: UnitSubmission,
}

/// Form-encoded submission posted by the plain HTML form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormSubmission {
    #[serde(default)]
    pub localidade_nome: String,
    #[serde(default)]
    pub unidade_nome: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub responsavel: String,
    #[serde(default)]
    pub numero_funcionarios: String,
    #[serde(default)]
    pub tipo_piso: Vec<String>,
    #[serde(default)]
    pub tipo_parede: Vec<String>,
    pub possui_estacionamento: Option<String>,
    pub estacionamento_coberto: Option<String>,
    pub possui_gramado: Option<String>,
    pub possui_sala_curativo: Option<String>,
    pub possui_sala_vacinacao: Option<String>,
    pub possui_vidros_altos: Option<String>,
    pub vidros_perigo: Option<String>,
    #[serde(default)]
    pub observacoes_gerais: String,
    pub medidas_dinamicas_json: Option<String>,
}

impl FormSubmission {
    pub fn into_envelope(self) -> SubmissionEnvelope {
        let checked = |field: &Option<String>| field.as_deref().is_some_and(truthy);

        let measurements = self
            .medidas_dinamicas_json
            .map(Value::String)
            .unwrap_or_default();

        let employee_count = Some(self.numero_funcionarios.trim())
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()));

        SubmissionEnvelope {
            locality: self.localidade_nome,
            unit: UnitSubmission {
                name: self.unidade_nome,
                registration_date: Some(self.data),
                responsible: self.responsavel,
                employee_count,
                flooring: self.tipo_piso,
                walls: self.tipo_parede,
                has_parking: checked(&self.possui_estacionamento),
                covered_parking: checked(&self.estacionamento_coberto),
                has_lawn: checked(&self.possui_gramado),
                has_first_aid_room: checked(&self.possui_sala_curativo),
                has_vaccination_room: checked(&self.possui_sala_vacinacao),
                has_high_glass: checked(&self.possui_vidros_altos),
                high_glass_danger: checked(&self.vidros_perigo),
                notes: self.observacoes_gerais,
                measurements,
                ..UnitSubmission::default()
            },
        }
    }
}

impl UnitSubmission {
    /// Validates the payload and builds the canonical unit record.
    ///
    /// # Errors
    /// * `Validation` for an empty name, an unparseable date or employee count, or a tag
    ///   outside the flooring/wall vocabularies
    pub fn into_unit(self) -> Result<Unit> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(RegistryError::Validation(
                "o nome da unidade é obrigatório".to_string(),
            ));
        }

        let registration_date = parse_date(self.registration_date.as_deref())?;
        let mut unit = Unit::new(name, registration_date);
        unit.responsible = self.responsible.trim().to_string();
        unit.employee_count = parse_count(self.employee_count.as_ref())?;

        for tag in self.flooring.iter().filter(|t| !t.trim().is_empty()) {
            unit.flooring.insert(FlooringType::parse_tag(tag)?);
        }
        for tag in self.walls.iter().filter(|t| !t.trim().is_empty()) {
            unit.walls.insert(WallType::parse_tag(tag)?);
        }

        unit.facilities = Facilities {
            has_parking: self.has_parking,
            covered_parking: self.covered_parking,
            has_lawn: self.has_lawn,
            has_first_aid_room: self.has_first_aid_room,
            has_vaccination_room: self.has_vaccination_room,
            has_high_glass: self.has_high_glass,
            high_glass_danger: self.high_glass_danger,
        }
        .normalized();
        unit.notes = self.notes.trim().to_string();

        let grouped = [
            (MeasurementCategory::Glass, self.medidas_vidros),
            (MeasurementCategory::RestroomLocker, self.medidas_sanitarios),
            (MeasurementCategory::InternalArea, self.medidas_internas),
            (MeasurementCategory::ExternalArea, self.medidas_externas),
        ];
        unit.measurements = measurement_items(self.measurements)
            .iter()
            .map(|raw| coerce_measurement(raw, None))
            .collect();
        for (category, raw) in grouped {
            unit.measurements.extend(
                measurement_items(raw)
                    .iter()
                    .map(|item| coerce_measurement(item, Some(&category))),
            );
        }

        let malformed = unit.malformed_measurements();
        if malformed > 0 {
            warn!(
                "Unit '{}' submitted with {} malformed measurement(s)",
                unit.name, malformed
            );
        }
        unit.updated_at = Utc::now();
        Ok(unit)
    }
}

/// Items of a submitted measurement list.
///
/// Clients send either an array or the array encoded as a JSON string. Text that is not
/// valid JSON becomes a single item, which then coerces to one malformed entry.
fn measurement_items(raw: Value) -> Vec<Value> {
    match raw {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        Value::String(text) if text.trim().is_empty() => Vec::new(),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Array(items)) => items,
            Ok(other) => vec![other],
            Err(err) => {
                warn!("Unparseable measurement payload: {}", err);
                vec![Value::String(text)]
            }
        },
        other => vec![other],
    }
}

/// Coerces one submitted measurement.
///
/// Accepted shapes are `[category, width, height, area?, quantity?]` and objects with
/// English or Portuguese keys. `group` supplies the category for entries that come from a
/// per-category list.
pub fn coerce_measurement(raw: &Value, group: Option<&MeasurementCategory>) -> MeasurementEntry {
    match try_coerce(raw, group) {
        Ok(measurement) => MeasurementEntry::Valid(measurement),
        Err(reason) => {
            warn!("Malformed measurement {}: {}", raw, reason);
            MeasurementEntry::Malformed(MalformedMeasurement {
                raw: raw.to_string(),
                reason,
            })
        }
    }
}

fn try_coerce(
    raw: &Value,
    group: Option<&MeasurementCategory>,
) -> std::result::Result<Measurement, String> {
    let (category, width, height, area, quantity) = match raw {
        Value::Array(items) => {
            if !(3..=5).contains(&items.len()) {
                return Err(format!(
                    "esperados de 3 a 5 valores, recebidos {}",
                    items.len()
                ));
            }
            let category = items[0]
                .as_str()
                .map(MeasurementCategory::from)
                .ok_or("a categoria deve ser texto")?;
            (
                category,
                dimension(&items[1], "largura")?,
                dimension(&items[2], "altura")?,
                items.get(3),
                items.get(4),
            )
        }
        Value::Object(map) => {
            let category = field(map, &["category", "categoria", "tipo"])
                .and_then(Value::as_str)
                .map(MeasurementCategory::from)
                .or_else(|| group.cloned())
                .ok_or("categoria ausente")?;
            let width = field(map, &["width", "largura"]).ok_or("largura ausente")?;
            let height =
                field(map, &["height", "altura", "comprimento"]).ok_or("altura ausente")?;
            (
                category,
                dimension(width, "largura")?,
                dimension(height, "altura")?,
                field(map, &["area", "área"]),
                field(map, &["quantity", "quantidade"]),
            )
        }
        _ => return Err("formato de medida não reconhecido".to_string()),
    };

    let mut measurement = Measurement::new(category, width, height);
    if let Some(given) = area.and_then(number) {
        if (given - measurement.area).abs() <= AREA_TOLERANCE {
            measurement.area = given;
        } else {
            warn!(
                "Area {} does not match {}x{}, storing {}",
                given, measurement.width, measurement.height, measurement.area
            );
        }
    }
    measurement.quantity = match quantity {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            number(value)
                .filter(|q| *q >= 0.0 && q.fract() == 0.0 && *q <= f64::from(u32::MAX))
                .map(|q| q as u32)
                .ok_or_else(|| format!("quantidade inválida: {}", value))?,
        ),
    };
    Ok(measurement)
}

fn field<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| map.get(*key))
        .filter(|v| !v.is_null())
}

fn dimension(value: &Value, what: &str) -> std::result::Result<Dimension, String> {
    match value {
        Value::Number(n) => {
            Dimension::from_number(n.clone()).ok_or_else(|| format!("{} negativa", what))
        }
        Value::String(s) => {
            Dimension::parse(s).ok_or_else(|| format!("{} não numérica: '{}'", what, s))
        }
        other => Err(format!("{} não numérica: {}", what, other)),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

fn parse_date(text: Option<&str>) -> Result<NaiveDate> {
    let text = text.map(str::trim).unwrap_or_default();
    if text.is_empty() {
        return Ok(Local::now().date_naive());
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .ok_or_else(|| RegistryError::Validation(format!("data inválida: '{}'", text)))
}

fn parse_count(value: Option<&Value>) -> Result<u32> {
    let invalid = || RegistryError::Validation("número de funcionários inválido".to_string());
    match value {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(invalid),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(0),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

fn truthy(text: &str) -> bool {
    matches!(
        text.trim().to_lowercase().as_str(),
        "sim" | "s" | "on" | "true" | "1" | "yes"
    )
}

fn flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(b),
        Value::String(s) => Ok(truthy(&s)),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|n| n != 0.0)),
        other => Err(D::Error::custom(format!(
            "valor inválido para opção sim/não: {}",
            other
        ))),
    }
}

fn string_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let invalid = |v: &Value| D::Error::custom(format!("tipo inválido: {}, esperado texto", v));
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s]),
        Value::Array(items) => items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                other => Err(invalid(&other)),
            })
            .collect(),
        other => Err(invalid(&other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn submission(value: Value) -> SubmissionEnvelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn tuple_measurements_keep_literals_and_compute_area() {
        let entry = coerce_measurement(&json!(["Glass", 1.2, 2.0]), None);
        let m = entry.as_valid().unwrap();
        assert_eq!(m.category, MeasurementCategory::Other("Glass".to_string()));
        assert_eq!(m.width.to_string(), "1.2");
        assert_eq!(m.height.to_string(), "2.0");
        assert!((m.area - 2.4).abs() < 1e-9);
        assert_eq!(m.quantity, None);
    }

    #[test]
    fn tuple_with_area_and_quantity() {
        let entry = coerce_measurement(&json!(["Vidro", "1,5", 2, 3.0, 4]), None);
        let m = entry.as_valid().unwrap();
        assert_eq!(m.category, MeasurementCategory::Glass);
        assert_eq!(m.area, 3.0);
        assert_eq!(m.quantity, Some(4));
    }

    #[test]
    fn two_element_tuple_is_malformed() {
        let entry = coerce_measurement(&json!(["Glass", 1.2]), None);
        match entry {
            MeasurementEntry::Malformed(bad) => {
                assert_eq!(bad.raw, r#"["Glass",1.2]"#);
                assert!(bad.reason.contains('2'));
            }
            other => panic!("expected malformed entry, got {:?}", other),
        }
    }

    #[test]
    fn non_numeric_width_is_malformed() {
        assert!(coerce_measurement(&json!(["Vidro", "largo", 2]), None).is_malformed());
        assert!(coerce_measurement(&json!(["Vidro", -1, 2]), None).is_malformed());
        assert!(coerce_measurement(&json!("3x4"), None).is_malformed());
        assert!(coerce_measurement(&json!(["Vidro", 1, 2, null, "muitos"]), None).is_malformed());
    }

    #[test]
    fn grouped_objects_take_the_group_category() {
        let group = MeasurementCategory::RestroomLocker;
        let entry = coerce_measurement(
            &json!({"largura": 1.2, "comprimento": 2.0, "area": 2.4}),
            Some(&group),
        );
        let m = entry.as_valid().unwrap();
        assert_eq!(m.category, MeasurementCategory::RestroomLocker);
        assert_eq!(m.area, 2.4);
    }

    #[test]
    fn inconsistent_area_is_replaced() {
        let entry = coerce_measurement(
            &json!({"category": "Área Externa", "width": 2, "height": 3, "area": 10}),
            None,
        );
        assert_eq!(entry.as_valid().unwrap().area, 6.0);
    }

    #[test]
    fn object_without_category_outside_a_group_is_malformed() {
        assert!(coerce_measurement(&json!({"width": 2, "height": 3}), None).is_malformed());
    }

    #[test]
    fn json_submission_with_portuguese_aliases() {
        let envelope = submission(json!({
            "localidade": "Matriz",
            "unidade": "Recepção",
            "data": "2025-03-01",
            "responsavel": "Ana",
            "numero_funcionarios": "12",
            "tipos_piso": "Porcelanato",
            "tipos_parede": ["Alvenaria", "Drywall"],
            "possui_estacionamento": "sim",
            "estacionamento_coberto": true,
            "vidros_perigo": "on",
            "medidas_vidros": [{"largura": 1.2, "comprimento": 2.0, "area": 2.4}],
            "medidas_internas": [],
        }));
        assert_eq!(envelope.locality, "Matriz");

        let unit = envelope.unit.into_unit().unwrap();
        assert_eq!(unit.name, "Recepção");
        assert_eq!(unit.registration_date, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(unit.employee_count, 12);
        assert!(unit.flooring.contains(&FlooringType::Porcelanato));
        assert_eq!(unit.walls.len(), 2);
        assert!(unit.facilities.has_parking && unit.facilities.covered_parking);
        // danger without high glass is cleared
        assert!(!unit.facilities.high_glass_danger);
        assert_eq!(unit.measurements.len(), 1);
    }

    #[test]
    fn measurement_list_may_arrive_as_json_text() {
        let unit = submission(json!({
            "unidade": "Sala",
            "medidas": "[[\"Vidro\", 1, 2]]",
            "medidas_internas": "[{\"largura\": 5, \"comprimento\": 3}]",
        }))
        .unit
        .into_unit()
        .unwrap();
        assert_eq!(unit.measurements.len(), 2);
        assert_eq!(unit.measurements[0].as_valid().unwrap().category, MeasurementCategory::Glass);
        assert_eq!(unit.measurements[1].as_valid().unwrap().area, 15.0);
    }

    #[test]
    fn unusable_measurement_list_degrades_to_one_malformed_entry() {
        for raw in [json!("[[\"Vidro\", 1"), json!(42), json!("\"3x4\"")] {
            let unit = submission(json!({"unidade": "Sala", "medidas": raw}))
                .unit
                .into_unit()
                .unwrap();
            assert_eq!(unit.measurements.len(), 1, "payload {}", raw);
            assert!(unit.measurements[0].is_malformed());
        }

        let empty = submission(json!({"unidade": "Sala", "medidas": ""}))
            .unit
            .into_unit()
            .unwrap();
        assert!(empty.measurements.is_empty());
    }

    #[test]
    fn tags_and_flags_of_the_wrong_shape_are_rejected() {
        let tags = serde_json::from_value::<SubmissionEnvelope>(json!({
            "unidade": "Sala",
            "tipos_piso": [1, "Porcelanato"],
        }));
        assert!(tags.unwrap_err().to_string().contains("tipo inválido"));

        let flag = serde_json::from_value::<SubmissionEnvelope>(json!({
            "unidade": "Sala",
            "possui_gramado": ["sim"],
        }));
        assert!(flag.unwrap_err().to_string().contains("sim/não"));

        let unset = submission(json!({"unidade": "Sala", "possui_gramado": null, "tipos_piso": null}));
        assert!(!unset.unit.has_lawn);
        assert!(unset.unit.flooring.is_empty());
    }

    #[test]
    fn empty_name_is_a_validation_error() {
        let err = UnitSubmission {
            name: "   ".to_string(),
            ..UnitSubmission::default()
        }
        .into_unit()
        .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
    }

    #[test]
    fn unknown_tag_and_bad_date_are_rejected() {
        let bad_tag = UnitSubmission {
            name: "Sala".to_string(),
            flooring: vec!["Grama".to_string()],
            ..UnitSubmission::default()
        };
        assert!(matches!(bad_tag.into_unit(), Err(RegistryError::Validation(_))));

        let bad_date = UnitSubmission {
            name: "Sala".to_string(),
            registration_date: Some("ontem".to_string()),
            ..UnitSubmission::default()
        };
        assert!(matches!(bad_date.into_unit(), Err(RegistryError::Validation(_))));
    }

    #[test]
    fn blank_date_defaults_to_today() {
        let unit = UnitSubmission {
            name: "Sala".to_string(),
            registration_date: Some(String::new()),
            ..UnitSubmission::default()
        }
        .into_unit()
        .unwrap();
        assert_eq!(unit.registration_date, Local::now().date_naive());
    }

    #[test]
    fn form_submission_parses_measurement_json() {
        let form = FormSubmission {
            localidade_nome: "Matriz".to_string(),
            unidade_nome: "Recepção".to_string(),
            data: "01/03/2025".to_string(),
            tipo_piso: vec!["Porcelanato".to_string()],
            possui_estacionamento: Some("sim".to_string()),
            estacionamento_coberto: Some("sim".to_string()),
            medidas_dinamicas_json: Some(r#"[["Área Interna", 5, 3]]"#.to_string()),
            ..FormSubmission::default()
        };
        let envelope = form.into_envelope();
        let unit = envelope.unit.into_unit().unwrap();
        assert_eq!(unit.registration_date, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        let m = unit.measurements[0].as_valid().unwrap();
        assert_eq!(m.category, MeasurementCategory::InternalArea);
        assert_eq!(m.area, 15.0);
        assert!(unit.facilities.covered_parking);
    }

    #[test]
    fn form_submission_with_broken_json_keeps_a_malformed_entry() {
        let form = FormSubmission {
            unidade_nome: "Sala".to_string(),
            medidas_dinamicas_json: Some("[[".to_string()),
            ..FormSubmission::default()
        };
        let unit = form.into_envelope().unit.into_unit().unwrap();
        assert_eq!(unit.measurements.len(), 1);
        assert!(unit.measurements[0].is_malformed());
    }
}
