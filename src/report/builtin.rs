use std::collections::BTreeMap;

use serde_json::{Value, json};

use super::schema::{EntityKind, Operand, Predicate, QuerySpec, Row};
use super::{Params, QueryError, ReportModule, ReportOutput};

fn take(row: &mut Row, field: &str) -> Value {
    row.remove(field).unwrap_or(Value::Null)
}

fn table(title: &str, columns: &[&str], rows: Vec<Row>) -> ReportOutput {
    let out_rows = rows
        .into_iter()
        .map(|mut row| columns.iter().map(|c| take(&mut row, c)).collect())
        .collect();
    ReportOutput::Table {
        title: title.to_string(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
        rows: out_rows,
    }
}

fn str_key(row: &Row, field: &str) -> String {
    row.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn num_key(row: &Row, field: &str) -> i64 {
    row.get(field).and_then(Value::as_i64).unwrap_or(0)
}

/// Chronological list of events starting inside [from, to), with rooms.
/// Params: `from`, `to` (unix millis).
pub struct DaySheet;

impl ReportModule for DaySheet {
    fn id(&self) -> &str {
        "day_sheet"
    }

    fn title(&self) -> &str {
        "Day Sheet"
    }

    fn query(&self) -> QuerySpec {
        QuerySpec::new(
            EntityKind::Events,
            &["title", "start", "end", "room_name", "site_name"],
        )
        .with_filter(Predicate::All(vec![
            Predicate::Ge("start".into(), Operand::Param("from".into())),
            Predicate::Lt("start".into(), Operand::Param("to".into())),
        ]))
    }

    fn present(&self, mut rows: Vec<Row>, params: &Params) -> Result<ReportOutput, QueryError> {
        for key in ["from", "to"] {
            match params.get(key) {
                None => return Err(QueryError::MissingParam(key.to_string())),
                Some(v) if v.as_i64().is_none() => {
                    return Err(QueryError::BadParam(key.to_string()));
                }
                Some(_) => {}
            }
        }
        rows.sort_by_key(|r| num_key(r, "start"));
        Ok(table(
            "Day Sheet",
            &["start", "end", "title", "room_name", "site_name"],
            rows,
        ))
    }
}

/// Every staff assignment, ordered by person then time.
pub struct StaffRoster;

impl ReportModule for StaffRoster {
    fn id(&self) -> &str {
        "staff_roster"
    }

    fn title(&self) -> &str {
        "Staff Roster"
    }

    fn query(&self) -> QuerySpec {
        QuerySpec::new(
            EntityKind::Assignments,
            &[
                "resource_name",
                "resource_category",
                "event_title",
                "start",
                "end",
                "room_name",
            ],
        )
        .with_filter(Predicate::Eq(
            "resource_kind".into(),
            Operand::Value(json!("staff")),
        ))
    }

    fn present(&self, mut rows: Vec<Row>, _params: &Params) -> Result<ReportOutput, QueryError> {
        rows.sort_by(|a, b| {
            (str_key(a, "resource_name"), num_key(a, "start"))
                .cmp(&(str_key(b, "resource_name"), num_key(b, "start")))
        });
        Ok(table(
            "Staff Roster",
            &[
                "resource_name",
                "resource_category",
                "event_title",
                "start",
                "end",
                "room_name",
            ],
            rows,
        ))
    }
}

/// Every equipment assignment, ordered by item then time.
pub struct EquipmentManifest;

impl ReportModule for EquipmentManifest {
    fn id(&self) -> &str {
        "equipment_manifest"
    }

    fn title(&self) -> &str {
        "Equipment Manifest"
    }

    fn query(&self) -> QuerySpec {
        QuerySpec::new(
            EntityKind::Assignments,
            &[
                "resource_name",
                "resource_category",
                "event_title",
                "start",
                "end",
                "room_name",
            ],
        )
        .with_filter(Predicate::Eq(
            "resource_kind".into(),
            Operand::Value(json!("equipment")),
        ))
    }

    fn present(&self, mut rows: Vec<Row>, _params: &Params) -> Result<ReportOutput, QueryError> {
        rows.sort_by(|a, b| {
            (str_key(a, "resource_name"), num_key(a, "start"))
                .cmp(&(str_key(b, "resource_name"), num_key(b, "start")))
        });
        Ok(table(
            "Equipment Manifest",
            &[
                "resource_name",
                "resource_category",
                "event_title",
                "start",
                "end",
                "room_name",
            ],
            rows,
        ))
    }
}

/// Rooms grouped under their sites, as a JSON document.
pub struct SiteSummary;

impl ReportModule for SiteSummary {
    fn id(&self) -> &str {
        "site_summary"
    }

    fn title(&self) -> &str {
        "Site Summary"
    }

    fn query(&self) -> QuerySpec {
        QuerySpec::new(EntityKind::Rooms, &["site_name", "name", "capacity"])
    }

    fn present(&self, mut rows: Vec<Row>, _params: &Params) -> Result<ReportOutput, QueryError> {
        rows.sort_by(|a, b| {
            (str_key(a, "site_name"), str_key(a, "name"))
                .cmp(&(str_key(b, "site_name"), str_key(b, "name")))
        });
        let mut by_site: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for mut row in rows {
            let site = match take(&mut row, "site_name") {
                Value::String(s) => s,
                _ => String::new(),
            };
            by_site.entry(site).or_default().push(json!({
                "name": take(&mut row, "name"),
                "capacity": take(&mut row, "capacity"),
            }));
        }
        let sites: Vec<Value> = by_site
            .into_iter()
            .map(|(name, rooms)| json!({ "name": name, "rooms": rooms }))
            .collect();
        Ok(ReportOutput::Document {
            title: "Site Summary".into(),
            body: json!({ "sites": sites }),
        })
    }
}
