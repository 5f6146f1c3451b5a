//! Shared vocabulary for the sandbox revert engine: the mutation actions and
//! their TTL classes, row provenance, before-image snapshots, and the module
//! registry that declares which tables and columns the store may touch.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod registry;

pub use registry::{module, modules, ColumnSpec, ColumnType, ModuleSchema};

/// The kind of provisional mutation a caller performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    /// How long the mutation survives before the sweeper undoes it.
    pub fn ttl(&self) -> Duration {
        match self {
            Action::Create => Duration::hours(2),
            Action::Update | Action::Delete => Duration::hours(1),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    pub fn parse(label: &str) -> Result<Self, ParseLabelError> {
        match label {
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            other => Err(ParseLabelError::new("action", other)),
        }
    }
}

/// Whether a row belongs to the curated baseline or was created by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Seeded or admin-curated; never physically deleted by the sweeper.
    Baseline,
    /// Caller-created; always mortal.
    Ephemeral,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Baseline => "baseline",
            Origin::Ephemeral => "ephemeral",
        }
    }

    pub fn parse(label: &str) -> Result<Self, ParseLabelError> {
        match label {
            "baseline" => Ok(Origin::Baseline),
            "ephemeral" => Ok(Origin::Ephemeral),
            other => Err(ParseLabelError::new("origin", other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized {kind} label: {value}")]
pub struct ParseLabelError {
    kind: &'static str,
    value: String,
}

impl ParseLabelError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Before-image of a row: the registered payload columns plus the row's
/// provenance at capture time. Identity and timestamp columns never enter
/// the blob, so restoring one can never clobber them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub origin: Origin,
    pub fields: Map<String, Value>,
}

impl Snapshot {
    pub fn new(origin: Origin, fields: Map<String, Value>) -> Self {
        Self { origin, fields }
    }

    pub fn to_json(&self) -> String {
        // Infallible: `fields` keys are strings and `Value` trees always
        // encode, so `to_string` has no failure path here.
        serde_json::to_string(self).expect("snapshot encodes to JSON")
    }

    /// Parse a stored blob. Earlier generations of the ledger stored the bare
    /// field map without provenance; those rows restore as baseline, which is
    /// what the old restore path always forced.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(raw)?;
        if value.get("fields").map(|f| f.is_object()).unwrap_or(false) {
            return serde_json::from_value(value);
        }
        match value {
            Value::Object(fields) => Ok(Snapshot::new(Origin::Baseline, fields)),
            other => serde_json::from_value(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ttl_classes_match_action() {
        assert_eq!(Action::Create.ttl(), Duration::hours(2));
        assert_eq!(Action::Update.ttl(), Duration::hours(1));
        assert_eq!(Action::Delete.ttl(), Duration::hours(1));
    }

    #[test]
    fn labels_round_trip() {
        for action in [Action::Create, Action::Update, Action::Delete] {
            assert_eq!(Action::parse(action.as_str()).unwrap(), action);
        }
        for origin in [Origin::Baseline, Origin::Ephemeral] {
            assert_eq!(Origin::parse(origin.as_str()).unwrap(), origin);
        }
        assert!(Action::parse("merge").is_err());
        assert!(Origin::parse("frozen").is_err());
    }

    #[test]
    fn snapshot_round_trips_with_origin() {
        let mut fields = Map::new();
        fields.insert("title".into(), json!("1984"));
        fields.insert("year".into(), json!(1949));
        let snap = Snapshot::new(Origin::Ephemeral, fields);
        let parsed = Snapshot::from_json(&snap.to_json()).unwrap();
        assert_eq!(parsed, snap);
    }

    #[test]
    fn bare_map_blob_parses_as_baseline() {
        let parsed = Snapshot::from_json(r#"{"title":"1984","year":1949}"#).unwrap();
        assert_eq!(parsed.origin, Origin::Baseline);
        assert_eq!(parsed.fields.get("title"), Some(&json!("1984")));
    }

    #[test]
    fn garbage_blob_is_an_error() {
        assert!(Snapshot::from_json("not json").is_err());
        assert!(Snapshot::from_json("[1,2,3]").is_err());
    }
}
