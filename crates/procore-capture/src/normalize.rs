//! Record normalizer: maps heterogeneous upstream JSON into canonical records.
//!
//! Every function here is pure and total: malformed or unrecognized items
//! are dropped, never reported as errors. Upstream endpoints disagree on
//! whether a field is flat (`vendor_name`) or nested (`vendor.name`); the
//! flat shape always wins.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use crate::types::{
    CanonicalRecord, CaptureEvent, Commitment, Drawing, Identified, LookupEntry, LookupMap, Rfi,
    Specification,
};

type Object = Map<String, Value>;

/// Envelope keys that may hold the item array in an object payload.
const ITEM_KEYS: &[&str] = &["data", "rows", "entities", "items"];

// ── Field helpers ──────────────────────────

fn object(item: &Value) -> Option<&Object> {
    item.as_object()
}

/// Parse an identifier that may arrive as a number or a numeric string.
fn coerce_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

/// Non-empty string, or a number rendered as a string.
fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn field(obj: &Object, key: &str) -> Option<String> {
    obj.get(key).and_then(text)
}

fn nested(obj: &Object, key: &str, inner: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_object)
        .and_then(|o| o.get(inner))
        .and_then(text)
}

/// A value that may be a direct string or an object with a `name`.
fn name_of(obj: &Object, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::Object(o) => o.get("name").and_then(text),
        other => text(other),
    }
}

fn present(obj: &Object, key: &str) -> bool {
    obj.get(key).is_some_and(|v| !v.is_null())
}

fn type_mentions_contract(obj: &Object) -> bool {
    obj.get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| t.contains("Contract"))
}

// ── Classification ──────────────────────────

/// Shared precondition: a JSON object carrying an identifier.
pub fn has_identifier(item: &Value) -> bool {
    object(item).is_some_and(|o| present(o, "id"))
}

fn looks_like_commitment(obj: &Object) -> bool {
    present(obj, "vendor")
        || present(obj, "vendor_name")
        || present(obj, "contract_date")
        || type_mentions_contract(obj)
}

/// A drawing has a number-like field and none of the commitment markers.
///
/// The exclusion keeps commitment rows out of drawing results when both
/// come back from the same grid endpoint.
pub fn is_drawing_like(item: &Value) -> bool {
    let Some(obj) = object(item) else {
        return false;
    };
    present(obj, "id")
        && (present(obj, "number") || present(obj, "drawing_number"))
        && !looks_like_commitment(obj)
}

/// A commitment has an identifying field and a vendor or contract marker,
/// and never a drawing number.
pub fn is_commitment_like(item: &Value) -> bool {
    let Some(obj) = object(item) else {
        return false;
    };
    if !present(obj, "id") || present(obj, "drawing_number") {
        return false;
    }
    let identifying =
        present(obj, "number") || present(obj, "title") || present(obj, "contract_date");
    let party = present(obj, "vendor") || present(obj, "vendor_name") || type_mentions_contract(obj);
    identifying && party
}

// ── Per-kind normalizers ──────────────────────────

fn drawing(item: &Value) -> Option<Drawing> {
    if !is_drawing_like(item) {
        return None;
    }
    let obj = object(item)?;
    let id = coerce_id(obj.get("id")?)?;
    let number = field(obj, "number").or_else(|| field(obj, "drawing_number"))?;

    let discipline = field(obj, "discipline_name").or_else(|| name_of(obj, "discipline"));
    let discipline_id = obj
        .get("discipline_id")
        .and_then(coerce_id)
        .or_else(|| {
            obj.get("discipline")
                .and_then(Value::as_object)
                .and_then(|d| d.get("id"))
                .and_then(coerce_id)
        });

    Some(Drawing {
        id,
        number,
        title: field(obj, "title").unwrap_or_default(),
        discipline,
        discipline_id,
        revision: field(obj, "revision_number")
            .or_else(|| nested(obj, "current_revision", "revision_number")),
        drawing_date: field(obj, "drawing_date")
            .or_else(|| nested(obj, "current_revision", "drawing_date")),
        received_date: field(obj, "received_date")
            .or_else(|| nested(obj, "current_revision", "received_date")),
        status: name_of(obj, "status").or_else(|| nested(obj, "current_revision", "status")),
    })
}

/// Normalize drawing-log items. Commitment-shaped rows are excluded.
pub fn normalize_drawings(items: &[Value]) -> Vec<Drawing> {
    let out: Vec<Drawing> = items.iter().filter_map(drawing).collect();
    if out.len() < items.len() {
        tracing::debug!("Dropped {} non-drawing items", items.len() - out.len());
    }
    out
}

/// Fill in missing discipline names from a discipline lookup.
pub fn apply_disciplines(drawings: &mut [Drawing], disciplines: &LookupMap) {
    if !disciplines.is_available() {
        return;
    }
    for d in drawings.iter_mut().filter(|d| d.discipline.is_none()) {
        if let Some(name) = d.discipline_id.and_then(|id| disciplines.name(id)) {
            d.discipline = Some(name.to_string());
        }
    }
}

fn rfi(item: &Value) -> Option<Rfi> {
    let obj = object(item)?;
    let id = coerce_id(obj.get("id")?)?;

    let assignee = field(obj, "assignee_name")
        .or_else(|| name_of(obj, "assignee"))
        .or_else(|| {
            obj.get("assignees")
                .and_then(Value::as_array)
                .and_then(|a| a.first())
                .and_then(|a| a.get("name"))
                .and_then(text)
        });

    let ball_in_court = match obj.get("ball_in_court") {
        Some(Value::Array(people)) => {
            let names: Vec<String> = people
                .iter()
                .filter_map(|p| match p {
                    Value::Object(o) => o.get("name").and_then(text),
                    other => text(other),
                })
                .collect();
            (!names.is_empty()).then(|| names.join(", "))
        }
        _ => name_of(obj, "ball_in_court"),
    };

    Some(Rfi {
        id,
        number: field(obj, "number")
            .or_else(|| field(obj, "full_number"))
            .unwrap_or_default(),
        subject: field(obj, "subject")
            .or_else(|| field(obj, "title"))
            .unwrap_or_default(),
        status: name_of(obj, "status"),
        due_date: field(obj, "due_date"),
        assignee,
        ball_in_court,
    })
}

/// Normalize RFI items.
pub fn normalize_rfis(items: &[Value]) -> Vec<Rfi> {
    items.iter().filter_map(rfi).collect()
}

fn commitment(item: &Value) -> Option<Commitment> {
    if !is_commitment_like(item) {
        return None;
    }
    let obj = object(item)?;
    Some(Commitment {
        id: coerce_id(obj.get("id")?)?,
        number: field(obj, "number"),
        title: field(obj, "title"),
        vendor: field(obj, "vendor_name").or_else(|| name_of(obj, "vendor")),
        status: name_of(obj, "status"),
        contract_date: field(obj, "contract_date"),
        commitment_type: field(obj, "type").or_else(|| field(obj, "contract_type")),
    })
}

/// Normalize commitment items. Drawing-shaped rows are excluded.
pub fn normalize_commitments(items: &[Value]) -> Vec<Commitment> {
    items.iter().filter_map(commitment).collect()
}

fn specification(item: &Value) -> Option<Specification> {
    let obj = object(item)?;
    let id = coerce_id(obj.get("id")?)?;
    let division_id = obj
        .get("specification_section_division_id")
        .and_then(coerce_id)
        .or_else(|| obj.get("division_id").and_then(coerce_id))
        .or_else(|| {
            obj.get("division")
                .and_then(Value::as_object)
                .and_then(|d| d.get("id"))
                .and_then(coerce_id)
        });

    Some(Specification {
        id,
        number: field(obj, "number").unwrap_or_default(),
        // Upstream ships the section title as `description`.
        title: field(obj, "description").unwrap_or_default(),
        division_id,
        revision: field(obj, "revision").or_else(|| nested(obj, "current_revision", "revision")),
    })
}

/// Normalize specification sections, coercing string ids to integers.
pub fn normalize_specifications(items: &[Value]) -> Vec<Specification> {
    items.iter().filter_map(specification).collect()
}

// ── Lookups ──────────────────────────

/// Build a lookup from items, keeping each item's position in `items`.
///
/// The first occurrence of an id wins.
pub fn lookup_map<F>(items: &[Value], display_name: F) -> LookupMap
where
    F: Fn(&Object) -> Option<String>,
{
    let mut entries = HashMap::new();
    for (index, item) in items.iter().enumerate() {
        let Some(obj) = object(item) else { continue };
        let Some(id) = obj.get("id").and_then(coerce_id) else {
            continue;
        };
        let Some(name) = display_name(obj) else {
            continue;
        };
        entries.entry(id).or_insert(LookupEntry { name, index });
    }
    LookupMap::from_entries(entries)
}

/// Discipline lookup: `{id, name}` items.
pub fn discipline_lookup(items: &[Value]) -> LookupMap {
    lookup_map(items, |o| field(o, "name"))
}

/// Division lookup: `{id, number, description}` items, named "number - description".
pub fn division_lookup(items: &[Value]) -> LookupMap {
    lookup_map(items, |o| {
        match (field(o, "number"), field(o, "description").or_else(|| field(o, "name"))) {
            (Some(n), Some(d)) => Some(format!("{n} - {d}")),
            (None, Some(d)) => Some(d),
            (Some(n), None) => Some(n),
            (None, None) => None,
        }
    })
}

// ── Payload envelopes ──────────────────────────

/// Locate the item array inside a payload.
///
/// Accepts a bare array or an object holding one under a known envelope
/// key, one level deep (`{data: {rows: [...]}}` included).
pub fn extract_items(payload: &Value) -> &[Value] {
    match payload {
        Value::Array(items) => items.as_slice(),
        Value::Object(obj) => {
            for key in ITEM_KEYS {
                match obj.get(*key) {
                    Some(Value::Array(items)) => return items.as_slice(),
                    Some(inner @ Value::Object(_)) => {
                        let nested = extract_items(inner);
                        if !nested.is_empty() {
                            return nested;
                        }
                    }
                    _ => {}
                }
            }
            &[]
        }
        _ => &[],
    }
}

/// Normalize a captured payload into canonical records.
///
/// The source URL decides the family. Grid-row and other mixed endpoints
/// go through both the drawing and the commitment predicates, which are
/// mutually exclusive.
pub fn records_from_capture(event: &CaptureEvent) -> Vec<CanonicalRecord> {
    let items = extract_items(&event.payload);
    if items.is_empty() {
        return Vec::new();
    }
    let path = url::Url::parse(&event.source_url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| event.source_url.to_ascii_lowercase());

    if path.contains("drawing_disciplines") || path.contains("specification_section_divisions") {
        return Vec::new();
    }
    if path.contains("rfis") {
        return normalize_rfis(items).into_iter().map(CanonicalRecord::Rfi).collect();
    }
    if path.contains("specification_sections") {
        return normalize_specifications(items)
            .into_iter()
            .map(CanonicalRecord::Specification)
            .collect();
    }
    if path.contains("drawing_log") || path.contains("drawing_revisions") || path.contains("drawings")
    {
        return normalize_drawings(items)
            .into_iter()
            .map(CanonicalRecord::Drawing)
            .collect();
    }
    if path.contains("commitments") || path.contains("contracts") {
        return normalize_commitments(items)
            .into_iter()
            .map(CanonicalRecord::Commitment)
            .collect();
    }

    items
        .iter()
        .filter_map(|item| {
            drawing(item)
                .map(CanonicalRecord::Drawing)
                .or_else(|| commitment(item).map(CanonicalRecord::Commitment))
        })
        .collect()
}

/// Drop later duplicates by id, keeping the first occurrence and the order.
pub fn dedup_by_id<T: Identified>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.record_id()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceKind;
    use serde_json::json;

    #[test]
    fn test_drawing_flat_and_nested_discipline() {
        let items = vec![
            json!({"id": 1, "number": "A-101", "title": "Plan", "discipline_name": "Architectural",
                   "discipline": {"id": 9, "name": "ignored"}}),
            json!({"id": 2, "number": "M-201", "title": "HVAC", "discipline": {"id": 12, "name": "Mechanical"},
                   "current_revision": {"revision_number": "3", "drawing_date": "2024-01-02"}}),
            json!({"id": 3, "number": "E-1", "discipline": "Electrical"}),
        ];
        let drawings = normalize_drawings(&items);
        assert_eq!(drawings.len(), 3);
        assert_eq!(drawings[0].discipline.as_deref(), Some("Architectural"));
        assert_eq!(drawings[0].discipline_id, Some(9));
        assert_eq!(drawings[1].discipline.as_deref(), Some("Mechanical"));
        assert_eq!(drawings[1].revision.as_deref(), Some("3"));
        assert_eq!(drawings[1].drawing_date.as_deref(), Some("2024-01-02"));
        assert_eq!(drawings[2].discipline.as_deref(), Some("Electrical"));
        assert_eq!(drawings[2].title, "");
    }

    #[test]
    fn test_drawing_excludes_commitment_shapes() {
        let items = vec![
            json!({"id": 1, "drawing_number": "A-1", "vendor": {"name": "Acme"}}),
            json!({"id": 2, "number": "SC-001", "contract_date": "2024-03-01"}),
            json!({"id": 3, "number": "PO-7", "type": "PurchaseOrderContract"}),
        ];
        assert!(normalize_drawings(&items).is_empty());
        // Item 1 carries a drawing number, so it is not a commitment either.
        let commitments = normalize_commitments(&items);
        let ids: Vec<u64> = commitments.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn test_classifiers_are_mutually_exclusive() {
        let samples = vec![
            json!({"id": 1, "number": "A-1"}),
            json!({"id": 2, "number": "SC-1", "vendor_name": "Acme"}),
            json!({"id": 3, "title": "Work order", "type": "WorkOrderContract"}),
            json!({"id": 4, "drawing_number": "S-1", "vendor_name": "Acme"}),
            json!({"id": 5, "number": "X", "contract_date": "2024-01-01", "vendor": null}),
            json!({"number": "no id"}),
            json!(null),
            json!("string"),
        ];
        for s in &samples {
            assert!(
                !(is_drawing_like(s) && is_commitment_like(s)),
                "both predicates matched {s}"
            );
        }
    }

    #[test]
    fn test_commitment_vendor_reconciliation() {
        let items = vec![
            json!({"id": 10, "number": "SC-1", "vendor_name": "Flat Co", "vendor": {"name": "Nested Co"}}),
            json!({"id": 11, "title": "Steel", "vendor": {"id": 4, "name": "Nested Co"}, "status": {"name": "Approved"}}),
            json!({"id": 12, "vendor": "Acme"}),
        ];
        let c = normalize_commitments(&items);
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].vendor.as_deref(), Some("Flat Co"));
        assert_eq!(c[1].vendor.as_deref(), Some("Nested Co"));
        assert_eq!(c[1].status.as_deref(), Some("Approved"));
    }

    #[test]
    fn test_specification_id_coercion_and_title() {
        let items = vec![
            json!({"id": "501", "number": "03 30 00", "description": "Cast-in-Place Concrete",
                   "specification_section_division_id": "3"}),
            json!({"id": "abc", "number": "bad"}),
            json!({"id": 502, "number": "05 12 00", "description": "Structural Steel", "division": {"id": 5}}),
        ];
        let specs = normalize_specifications(&items);
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].id, 501);
        assert_eq!(specs[0].title, "Cast-in-Place Concrete");
        assert_eq!(specs[0].division_id, Some(3));
        assert_eq!(specs[1].division_id, Some(5));
    }

    #[test]
    fn test_rfi_assignee_and_ball_in_court() {
        let items = vec![json!({
            "id": 7, "number": 12, "subject": "Beam clash", "status": "open",
            "assignee": {"name": "Dana"},
            "ball_in_court": [{"name": "Dana"}, {"name": "Lee"}]
        })];
        let rfis = normalize_rfis(&items);
        assert_eq!(rfis[0].number, "12");
        assert_eq!(rfis[0].assignee.as_deref(), Some("Dana"));
        assert_eq!(rfis[0].ball_in_court.as_deref(), Some("Dana, Lee"));
    }

    #[test]
    fn test_extract_items_envelopes() {
        assert_eq!(extract_items(&json!([{"id": 1}])).len(), 1);
        assert_eq!(extract_items(&json!({"data": [{"id": 1}, {"id": 2}]})).len(), 2);
        assert_eq!(extract_items(&json!({"data": {"rows": [{"id": 1}]}})).len(), 1);
        assert!(extract_items(&json!({"total": 3})).is_empty());
        assert!(extract_items(&json!("nope")).is_empty());
    }

    #[test]
    fn test_lookup_preserves_source_index() {
        let items = vec![
            json!({"id": 5, "name": "Civil"}),
            json!({"name": "no id"}),
            json!({"id": 2, "name": "Structural"}),
            json!({"id": 5, "name": "Duplicate"}),
        ];
        let map = discipline_lookup(&items);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(5).unwrap().index, 0);
        assert_eq!(map.get(5).unwrap().name, "Civil");
        assert_eq!(map.get(2).unwrap().index, 2);

        let divisions = division_lookup(&[json!({"id": 1, "number": "03", "description": "Concrete"})]);
        assert_eq!(divisions.name(1), Some("03 - Concrete"));
    }

    #[test]
    fn test_apply_disciplines_fills_missing_names() {
        let mut drawings = normalize_drawings(&[json!({"id": 1, "number": "S-1", "discipline_id": 2})]);
        let map = discipline_lookup(&[json!({"id": 2, "name": "Structural"})]);
        apply_disciplines(&mut drawings, &map);
        assert_eq!(drawings[0].discipline.as_deref(), Some("Structural"));
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let items = normalize_commitments(&[
            json!({"id": 1, "number": "A", "vendor_name": "X"}),
            json!({"id": 2, "number": "B", "vendor_name": "Y"}),
            json!({"id": 1, "number": "A-dup", "vendor_name": "Z"}),
        ]);
        let once = dedup_by_id(items);
        assert_eq!(once.len(), 2);
        assert_eq!(once[0].number.as_deref(), Some("A"));
        let twice = dedup_by_id(once.clone());
        assert_eq!(once, twice);
    }

    fn captured(source_url: &str, payload: Value) -> CaptureEvent {
        CaptureEvent {
            payload,
            source_url: source_url.to_string(),
            context_ids: Default::default(),
            pagination_headers: Default::default(),
            captured_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_grid_rows_split_into_drawings_and_commitments() {
        let event = captured(
            "https://app.procore.com/webclients/host/companies/8/projects/562/tools/server_side_rows",
            json!({"rows": [
                {"id": 1, "drawing_number": "A-100", "vendor_name": "Acme"},
                {"id": 2, "number": "A-101"},
                {"id": 3, "number": "SC-7", "vendor": {"name": "Steel Co"}},
            ]}),
        );
        let found: Vec<(ResourceKind, u64)> = records_from_capture(&event)
            .iter()
            .map(|r| (r.kind(), r.id()))
            .collect();
        assert_eq!(
            found,
            vec![(ResourceKind::Drawings, 2), (ResourceKind::Commitments, 3)]
        );
    }
}
