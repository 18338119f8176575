use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::Snapshot;
use crate::model::*;

use super::Params;
use super::error::QueryError;

/// The five queryable entity streams. Every row a stream yields carries
/// the full denormalized field set listed in [`fields_for`]; projection
/// happens after filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Sites,
    Rooms,
    Events,
    Resources,
    Assignments,
}

impl EntityKind {
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Sites => "sites",
            EntityKind::Rooms => "rooms",
            EntityKind::Events => "events",
            EntityKind::Resources => "resources",
            EntityKind::Assignments => "assignments",
        }
    }
}

/// Queryable fields per entity. Joined fields (room_name, site_name, ...)
/// are denormalized into the row at materialization time.
pub fn fields_for(entity: EntityKind) -> &'static [&'static str] {
    match entity {
        EntityKind::Sites => &["id", "name", "address"],
        EntityKind::Rooms => &["id", "name", "capacity", "site_id", "site_name"],
        EntityKind::Events => &[
            "id",
            "title",
            "start",
            "end",
            "room_id",
            "room_name",
            "site_id",
            "site_name",
        ],
        EntityKind::Resources => &[
            "id",
            "kind",
            "name",
            "category",
            "window_start",
            "window_end",
        ],
        EntityKind::Assignments => &[
            "id",
            "resource_id",
            "resource_kind",
            "resource_name",
            "resource_category",
            "event_id",
            "event_title",
            "start",
            "end",
            "room_id",
            "room_name",
            "site_id",
            "site_name",
        ],
    }
}

/// A value in a predicate: a literal, or a named parameter filled in per
/// run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Value(Value),
    Param(String),
}

/// Filter tree evaluated per row. A comparison against a missing, null,
/// or type-mismatched field matches nothing, for every operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Eq(String, Operand),
    Ne(String, Operand),
    Lt(String, Operand),
    Le(String, Operand),
    Gt(String, Operand),
    Ge(String, Operand),
    /// Case-insensitive substring match on string fields.
    Contains(String, Operand),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
}

/// Declarative description of what a report reads: one entity stream, a
/// field projection, an optional filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub entity: EntityKind,
    pub fields: Vec<String>,
    pub filter: Option<Predicate>,
}

impl QuerySpec {
    pub fn new(entity: EntityKind, fields: &[&str]) -> Self {
        Self {
            entity,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Predicate) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// One denormalized result row.
pub type Row = BTreeMap<String, Value>;

/// Registration-time check: every projected and filtered field must exist
/// on the entity.
pub fn validate_spec(spec: &QuerySpec) -> Result<(), QueryError> {
    let known = fields_for(spec.entity);
    for field in &spec.fields {
        if !known.contains(&field.as_str()) {
            return Err(QueryError::UnknownField {
                entity: spec.entity,
                field: field.clone(),
            });
        }
    }
    if let Some(filter) = &spec.filter {
        validate_predicate(spec.entity, filter)?;
    }
    Ok(())
}

fn validate_predicate(entity: EntityKind, predicate: &Predicate) -> Result<(), QueryError> {
    match predicate {
        Predicate::Eq(field, _)
        | Predicate::Ne(field, _)
        | Predicate::Lt(field, _)
        | Predicate::Le(field, _)
        | Predicate::Gt(field, _)
        | Predicate::Ge(field, _)
        | Predicate::Contains(field, _) => {
            if !fields_for(entity).contains(&field.as_str()) {
                return Err(QueryError::UnknownField {
                    entity,
                    field: field.clone(),
                });
            }
            Ok(())
        }
        Predicate::All(children) | Predicate::Any(children) => {
            for child in children {
                validate_predicate(entity, child)?;
            }
            Ok(())
        }
        Predicate::Not(inner) => validate_predicate(entity, inner),
    }
}

/// Run a spec against a snapshot: build denormalized rows for the entity,
/// apply the filter, then project the requested fields.
pub fn materialize(
    snapshot: &Snapshot,
    spec: &QuerySpec,
    params: &Params,
) -> Result<Vec<Row>, QueryError> {
    let full = rows_for(snapshot, spec.entity);
    let mut out = Vec::new();
    for row in full {
        let keep = match &spec.filter {
            Some(filter) => eval(filter, &row, params)?,
            None => true,
        };
        if !keep {
            continue;
        }
        let mut projected = Row::new();
        for field in &spec.fields {
            let value = row.get(field.as_str()).cloned().unwrap_or(Value::Null);
            projected.insert(field.clone(), value);
        }
        out.push(projected);
    }
    Ok(out)
}

fn rows_for(snapshot: &Snapshot, entity: EntityKind) -> Vec<Row> {
    match entity {
        EntityKind::Sites => snapshot.sites.iter().map(site_row).collect(),
        EntityKind::Rooms => snapshot
            .rooms
            .iter()
            .map(|r| room_row(snapshot, r))
            .collect(),
        EntityKind::Events => snapshot
            .events
            .iter()
            .map(|e| event_row(snapshot, e))
            .collect(),
        EntityKind::Resources => snapshot.resources.iter().map(resource_row).collect(),
        // Assignments whose resource or event fell out of a torn copy are
        // dropped rather than emitted half-joined.
        EntityKind::Assignments => snapshot
            .assignments
            .iter()
            .filter_map(|a| assignment_row(snapshot, a))
            .collect(),
    }
}

fn opt_str(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::String(s.clone()),
        None => Value::Null,
    }
}

fn site_row(site: &Site) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), Value::String(site.id.to_string()));
    row.insert("name".into(), Value::String(site.name.clone()));
    row.insert("address".into(), opt_str(&site.address));
    row
}

fn room_row(snapshot: &Snapshot, room: &Room) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), Value::String(room.id.to_string()));
    row.insert("name".into(), Value::String(room.name.clone()));
    row.insert(
        "capacity".into(),
        room.capacity.map(Value::from).unwrap_or(Value::Null),
    );
    row.insert("site_id".into(), Value::String(room.site_id.to_string()));
    row.insert(
        "site_name".into(),
        snapshot
            .site(&room.site_id)
            .map(|s| Value::String(s.name.clone()))
            .unwrap_or(Value::Null),
    );
    row
}

fn event_row(snapshot: &Snapshot, event: &Event) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), Value::String(event.id.to_string()));
    row.insert("title".into(), Value::String(event.title.clone()));
    row.insert("start".into(), Value::from(event.span.start));
    row.insert("end".into(), Value::from(event.span.end));
    row.insert("room_id".into(), Value::String(event.room_id.to_string()));
    let room = snapshot.room(&event.room_id);
    row.insert(
        "room_name".into(),
        room.map(|r| Value::String(r.name.clone()))
            .unwrap_or(Value::Null),
    );
    let site = room.and_then(|r| snapshot.site(&r.site_id));
    row.insert(
        "site_id".into(),
        site.map(|s| Value::String(s.id.to_string()))
            .unwrap_or(Value::Null),
    );
    row.insert(
        "site_name".into(),
        site.map(|s| Value::String(s.name.clone()))
            .unwrap_or(Value::Null),
    );
    row
}

fn resource_row(resource: &Resource) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), Value::String(resource.id.to_string()));
    row.insert("kind".into(), Value::String(resource.kind().label().into()));
    row.insert("name".into(), Value::String(resource.name().into()));
    row.insert(
        "category".into(),
        Value::String(resource.category().into()),
    );
    row.insert("window_start".into(), Value::from(resource.window.start));
    row.insert("window_end".into(), Value::from(resource.window.end));
    row
}

fn assignment_row(snapshot: &Snapshot, assignment: &Assignment) -> Option<Row> {
    let resource = snapshot.resource(&assignment.resource_id)?;
    let event = snapshot.event(&assignment.event_id)?;
    let mut row = Row::new();
    row.insert("id".into(), Value::String(assignment.id.to_string()));
    row.insert(
        "resource_id".into(),
        Value::String(resource.id.to_string()),
    );
    row.insert(
        "resource_kind".into(),
        Value::String(resource.kind().label().into()),
    );
    row.insert(
        "resource_name".into(),
        Value::String(resource.name().into()),
    );
    row.insert(
        "resource_category".into(),
        Value::String(resource.category().into()),
    );
    row.insert("event_id".into(), Value::String(event.id.to_string()));
    row.insert("event_title".into(), Value::String(event.title.clone()));
    row.insert("start".into(), Value::from(assignment.span.start));
    row.insert("end".into(), Value::from(assignment.span.end));
    row.insert("room_id".into(), Value::String(event.room_id.to_string()));
    let room = snapshot.room(&event.room_id);
    row.insert(
        "room_name".into(),
        room.map(|r| Value::String(r.name.clone()))
            .unwrap_or(Value::Null),
    );
    let site = room.and_then(|r| snapshot.site(&r.site_id));
    row.insert(
        "site_id".into(),
        site.map(|s| Value::String(s.id.to_string()))
            .unwrap_or(Value::Null),
    );
    row.insert(
        "site_name".into(),
        site.map(|s| Value::String(s.name.clone()))
            .unwrap_or(Value::Null),
    );
    Some(row)
}

fn eval(predicate: &Predicate, row: &Row, params: &Params) -> Result<bool, QueryError> {
    match predicate {
        Predicate::Eq(field, operand) => {
            Ok(compare(row, field, operand, params)?.is_some_and(|o| o == Ordering::Equal))
        }
        Predicate::Ne(field, operand) => {
            Ok(compare(row, field, operand, params)?.is_some_and(|o| o != Ordering::Equal))
        }
        Predicate::Lt(field, operand) => {
            Ok(compare(row, field, operand, params)?.is_some_and(|o| o == Ordering::Less))
        }
        Predicate::Le(field, operand) => {
            Ok(compare(row, field, operand, params)?.is_some_and(|o| o != Ordering::Greater))
        }
        Predicate::Gt(field, operand) => {
            Ok(compare(row, field, operand, params)?.is_some_and(|o| o == Ordering::Greater))
        }
        Predicate::Ge(field, operand) => {
            Ok(compare(row, field, operand, params)?.is_some_and(|o| o != Ordering::Less))
        }
        Predicate::Contains(field, operand) => {
            let needle = resolve(operand, params)?;
            match (row.get(field.as_str()), &needle) {
                (Some(Value::String(hay)), Value::String(n)) => {
                    Ok(hay.to_lowercase().contains(&n.to_lowercase()))
                }
                _ => Ok(false),
            }
        }
        Predicate::All(children) => {
            for child in children {
                if !eval(child, row, params)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Predicate::Any(children) => {
            for child in children {
                if eval(child, row, params)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Predicate::Not(inner) => Ok(!eval(inner, row, params)?),
    }
}

/// Three-way comparison between a row field and an operand. `None` when
/// the field is absent, null, or a different type than the operand.
fn compare(
    row: &Row,
    field: &str,
    operand: &Operand,
    params: &Params,
) -> Result<Option<Ordering>, QueryError> {
    let target = resolve(operand, params)?;
    let found = match row.get(field) {
        Some(v) => v,
        None => return Ok(None),
    };
    Ok(match (found, &target) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    })
}

fn resolve(operand: &Operand, params: &Params) -> Result<Value, QueryError> {
    match operand {
        Operand::Value(v) => Ok(v.clone()),
        Operand::Param(name) => params
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::MissingParam(name.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use ulid::Ulid;

    fn snapshot() -> Snapshot {
        let site = Site {
            id: Ulid::from(1u128),
            name: "Expo Hall".into(),
            address: None,
        };
        let room = Room {
            id: Ulid::from(2u128),
            site_id: site.id,
            name: "Hall A".into(),
            capacity: Some(120),
        };
        let event = Event {
            id: Ulid::from(3u128),
            room_id: room.id,
            title: "Opening Keynote".into(),
            span: Span::new(1000, 2000),
        };
        let staff = Resource {
            id: Ulid::from(4u128),
            window: Span::new(0, 10_000),
            detail: ResourceDetail::Staff {
                name: "Ana".into(),
                role: "rigger".into(),
                contact: None,
            },
        };
        let gear = Resource {
            id: Ulid::from(5u128),
            window: Span::new(0, 10_000),
            detail: ResourceDetail::Equipment {
                name: "Projector 1".into(),
                class: "projector".into(),
                notes: None,
            },
        };
        let assignment = Assignment {
            id: Ulid::from(6u128),
            resource_id: staff.id,
            event_id: event.id,
            span: event.span,
        };
        Snapshot {
            generation: 1,
            taken_at: 0,
            sites: vec![site],
            rooms: vec![room],
            events: vec![event],
            resources: vec![staff, gear],
            assignments: vec![assignment],
            meta: Vec::new(),
        }
    }

    fn no_params() -> Params {
        Params::new()
    }

    #[test]
    fn validate_rejects_unknown_projection_field() {
        let spec = QuerySpec::new(EntityKind::Sites, &["id", "bogus"]);
        assert!(matches!(
            validate_spec(&spec),
            Err(QueryError::UnknownField { field, .. }) if field == "bogus"
        ));
    }

    #[test]
    fn validate_rejects_unknown_filter_field() {
        let spec = QuerySpec::new(EntityKind::Events, &["title"]).with_filter(Predicate::Not(
            Box::new(Predicate::Eq("venue".into(), Operand::Value(json!("x")))),
        ));
        assert!(matches!(
            validate_spec(&spec),
            Err(QueryError::UnknownField { field, .. }) if field == "venue"
        ));
    }

    #[test]
    fn validate_accepts_nested_filters() {
        let spec = QuerySpec::new(EntityKind::Events, &["title"]).with_filter(Predicate::Any(
            vec![
                Predicate::Ge("start".into(), Operand::Param("from".into())),
                Predicate::All(vec![Predicate::Contains(
                    "title".into(),
                    Operand::Value(json!("keynote")),
                )]),
            ],
        ));
        assert!(validate_spec(&spec).is_ok());
    }

    #[test]
    fn materialize_projects_requested_fields() {
        let snap = snapshot();
        let spec = QuerySpec::new(EntityKind::Events, &["title", "room_name", "site_name"]);
        let rows = materialize(&snap, &spec, &no_params()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["title"], json!("Opening Keynote"));
        assert_eq!(rows[0]["room_name"], json!("Hall A"));
        assert_eq!(rows[0]["site_name"], json!("Expo Hall"));
        assert!(!rows[0].contains_key("start"));
    }

    #[test]
    fn materialize_denormalizes_assignments() {
        let snap = snapshot();
        let spec = QuerySpec::new(
            EntityKind::Assignments,
            &["resource_name", "event_title", "room_name", "start"],
        );
        let rows = materialize(&snap, &spec, &no_params()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["resource_name"], json!("Ana"));
        assert_eq!(rows[0]["event_title"], json!("Opening Keynote"));
        assert_eq!(rows[0]["room_name"], json!("Hall A"));
        assert_eq!(rows[0]["start"], json!(1000));
    }

    #[test]
    fn dangling_assignment_dropped() {
        let mut snap = snapshot();
        snap.assignments.push(Assignment {
            id: Ulid::from(7u128),
            resource_id: Ulid::from(99u128),
            event_id: snap.events[0].id,
            span: Span::new(1000, 2000),
        });
        let spec = QuerySpec::new(EntityKind::Assignments, &["id"]);
        let rows = materialize(&snap, &spec, &no_params()).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn numeric_range_filter() {
        let snap = snapshot();
        let spec = QuerySpec::new(EntityKind::Events, &["title"]).with_filter(Predicate::All(
            vec![
                Predicate::Ge("start".into(), Operand::Value(json!(500))),
                Predicate::Lt("start".into(), Operand::Value(json!(1500))),
            ],
        ));
        assert_eq!(materialize(&snap, &spec, &no_params()).unwrap().len(), 1);

        let miss = QuerySpec::new(EntityKind::Events, &["title"])
            .with_filter(Predicate::Ge("start".into(), Operand::Value(json!(5000))));
        assert!(materialize(&snap, &miss, &no_params()).unwrap().is_empty());
    }

    #[test]
    fn param_filter_resolves_at_run_time() {
        let snap = snapshot();
        let spec = QuerySpec::new(EntityKind::Resources, &["name"])
            .with_filter(Predicate::Eq("kind".into(), Operand::Param("kind".into())));

        let mut params = Params::new();
        params.insert("kind".into(), json!("equipment"));
        let rows = materialize(&snap, &spec, &params).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("Projector 1"));
    }

    #[test]
    fn missing_param_errors() {
        let snap = snapshot();
        let spec = QuerySpec::new(EntityKind::Resources, &["name"])
            .with_filter(Predicate::Eq("kind".into(), Operand::Param("kind".into())));
        assert!(matches!(
            materialize(&snap, &spec, &no_params()),
            Err(QueryError::MissingParam(p)) if p == "kind"
        ));
    }

    #[test]
    fn contains_is_case_insensitive() {
        let snap = snapshot();
        let spec = QuerySpec::new(EntityKind::Events, &["title"]).with_filter(
            Predicate::Contains("title".into(), Operand::Value(json!("KEYNOTE"))),
        );
        assert_eq!(materialize(&snap, &spec, &no_params()).unwrap().len(), 1);
    }

    #[test]
    fn type_mismatch_never_matches() {
        let snap = snapshot();
        // Comparing a numeric field to a string matches nothing, even Ne.
        let spec = QuerySpec::new(EntityKind::Events, &["title"])
            .with_filter(Predicate::Ne("start".into(), Operand::Value(json!("soon"))));
        assert!(materialize(&snap, &spec, &no_params()).unwrap().is_empty());
    }

    #[test]
    fn null_field_never_matches() {
        let snap = snapshot();
        // The only site has no address.
        let eq = QuerySpec::new(EntityKind::Sites, &["name"])
            .with_filter(Predicate::Eq("address".into(), Operand::Value(json!("1 Quay St"))));
        assert!(materialize(&snap, &eq, &no_params()).unwrap().is_empty());
        let ne = QuerySpec::new(EntityKind::Sites, &["name"])
            .with_filter(Predicate::Ne("address".into(), Operand::Value(json!("1 Quay St"))));
        assert!(materialize(&snap, &ne, &no_params()).unwrap().is_empty());
    }

    #[test]
    fn not_and_any_compose() {
        let snap = snapshot();
        let spec = QuerySpec::new(EntityKind::Resources, &["name"]).with_filter(Predicate::Not(
            Box::new(Predicate::Any(vec![Predicate::Eq(
                "kind".into(),
                Operand::Value(json!("staff")),
            )])),
        ));
        let rows = materialize(&snap, &spec, &no_params()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("Projector 1"));
    }
}
