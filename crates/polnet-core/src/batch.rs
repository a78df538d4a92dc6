//! Upstream extraction batch contract
//!
//! One batch per document, as produced by the extraction collaborator. Every
//! field is untrusted: records are validated one by one when converted into
//! mentions, and a bad record never fails the whole batch.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{EntityKind, PolnetError, RawMention, Result};

/// Attribute keys the extractor may emit as top-level record fields
const TOP_LEVEL_ATTRIBUTES: &[&str] = &["role", "employer", "party", "state", "expertise", "type"];

/// Structured extraction output for one document.
///
/// Records are read one by one: an entry whose fields have the wrong type
/// lands in `malformed` instead of failing the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawBatch")]
pub struct ExtractionBatch {
    pub document_id: String,

    pub timestamp: DateTime<Utc>,

    pub people: Vec<PersonRecord>,

    pub relationships: Vec<RelationshipRecord>,

    pub organizations: Vec<OrganizationRecord>,

    /// Entries that could not be read as records
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub malformed: Vec<MalformedRecord>,
}

/// Wire shape of a batch before records are typed
#[derive(Deserialize)]
struct RawBatch {
    document_id: String,

    #[serde(deserialize_with = "deserialize_timestamp")]
    timestamp: DateTime<Utc>,

    #[serde(default)]
    people: Vec<Value>,

    #[serde(default)]
    relationships: Vec<Value>,

    #[serde(default)]
    organizations: Vec<Value>,

    #[serde(default)]
    malformed: Vec<MalformedRecord>,
}

impl From<RawBatch> for ExtractionBatch {
    fn from(raw: RawBatch) -> Self {
        let mut malformed = raw.malformed;
        let people = typed_records(RecordSection::People, raw.people, &mut malformed);
        let relationships =
            typed_records(RecordSection::Relationships, raw.relationships, &mut malformed);
        let organizations =
            typed_records(RecordSection::Organizations, raw.organizations, &mut malformed);
        Self {
            document_id: raw.document_id,
            timestamp: raw.timestamp,
            people,
            relationships,
            organizations,
            malformed,
        }
    }
}

fn typed_records<T: DeserializeOwned>(
    section: RecordSection,
    values: Vec<Value>,
    malformed: &mut Vec<MalformedRecord>,
) -> Vec<T> {
    values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                malformed.push(MalformedRecord {
                    section,
                    index,
                    error: e.to_string(),
                });
                None
            }
        })
        .collect()
}

/// Batch section a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSection {
    People,
    Relationships,
    Organizations,
}

impl std::fmt::Display for RecordSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::People => "people",
            Self::Relationships => "relationships",
            Self::Organizations => "organizations",
        };
        write!(f, "{name}")
    }
}

/// An entry whose fields did not have the expected types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedRecord {
    pub section: RecordSection,

    /// Position within its section
    pub index: usize,

    pub error: String,
}

impl MalformedRecord {
    /// The record-level rejection this entry turns into
    pub fn to_error(&self, document_id: &str) -> PolnetError {
        PolnetError::Validation(format!(
            "{} record {} in document '{document_id}' is malformed: {}",
            self.section, self.index, self.error
        ))
    }
}

/// A person entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonRecord {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default, deserialize_with = "deserialize_attributes")]
    pub attributes: BTreeMap<String, String>,

    #[serde(default)]
    pub confidence: f32,

    #[serde(default)]
    pub context: Option<String>,

    /// Record-level timestamp overriding the document timestamp
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Unmodelled fields; known attribute keys are lifted from here
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// An organization entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrganizationRecord {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "deserialize_attributes")]
    pub attributes: BTreeMap<String, String>,

    #[serde(default)]
    pub confidence: f32,

    #[serde(default)]
    pub context: Option<String>,

    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A relationship entry between two named entities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipRecord {
    #[serde(default)]
    pub subject: Option<String>,

    #[serde(default)]
    pub predicate: Option<String>,

    #[serde(default)]
    pub object: Option<String>,

    #[serde(default)]
    pub confidence: f32,

    #[serde(default)]
    pub context: Option<String>,

    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ExtractionBatch {
    /// Create an empty batch
    pub fn new(document_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            document_id: document_id.into(),
            timestamp,
            people: Vec::new(),
            relationships: Vec::new(),
            organizations: Vec::new(),
            malformed: Vec::new(),
        }
    }

    /// Parse a batch from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| PolnetError::Validation(format!("malformed extraction batch: {e}")))
    }

    /// Document-level validation
    pub fn validate(&self) -> Result<()> {
        if self.document_id.trim().is_empty() {
            return Err(PolnetError::Validation(
                "extraction batch has an empty document_id".to_string(),
            ));
        }
        Ok(())
    }

    /// Total number of records in the batch
    pub fn record_count(&self) -> usize {
        self.people.len()
            + self.relationships.len()
            + self.organizations.len()
            + self.malformed.len()
    }
}

impl PersonRecord {
    /// Convert into a raw mention, rejecting records without a name
    pub fn to_mention(&self, batch: &ExtractionBatch) -> Result<RawMention> {
        let name = required(&self.name, "person", "name", batch)?;
        Ok(RawMention {
            source_document_id: batch.document_id.clone(),
            raw_name: name,
            kind: EntityKind::Person,
            category_hint: self.category.clone().unwrap_or_default(),
            attributes: merged_attributes(&self.attributes, &self.extra),
            confidence: self.confidence,
            timestamp: self.timestamp.unwrap_or(batch.timestamp),
            context: self.context.clone(),
        })
    }
}

impl OrganizationRecord {
    /// Convert into a raw mention, rejecting records without a name
    pub fn to_mention(&self, batch: &ExtractionBatch) -> Result<RawMention> {
        let name = required(&self.name, "organization", "name", batch)?;
        Ok(RawMention {
            source_document_id: batch.document_id.clone(),
            raw_name: name,
            kind: EntityKind::Organization,
            category_hint: "other".to_string(),
            attributes: merged_attributes(&self.attributes, &self.extra),
            confidence: self.confidence,
            timestamp: self.timestamp.unwrap_or(batch.timestamp),
            context: self.context.clone(),
        })
    }
}

impl RelationshipRecord {
    /// Subject, predicate and object, all required
    pub fn parts(&self, batch: &ExtractionBatch) -> Result<(String, String, String)> {
        Ok((
            required(&self.subject, "relationship", "subject", batch)?,
            required(&self.predicate, "relationship", "predicate", batch)?,
            required(&self.object, "relationship", "object", batch)?,
        ))
    }

    /// Effective timestamp of the record
    pub fn timestamp_in(&self, batch: &ExtractionBatch) -> DateTime<Utc> {
        self.timestamp.unwrap_or(batch.timestamp)
    }
}

fn required(
    value: &Option<String>,
    record: &str,
    field: &str,
    batch: &ExtractionBatch,
) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(PolnetError::Validation(format!(
            "{record} record in document '{}' is missing {field}",
            batch.document_id
        ))),
    }
}

fn merged_attributes(
    attributes: &BTreeMap<String, String>,
    extra: &BTreeMap<String, serde_json::Value>,
) -> BTreeMap<String, String> {
    let mut merged = attributes.clone();
    for key in TOP_LEVEL_ATTRIBUTES {
        if let Some(serde_json::Value::String(value)) = extra.get(*key) {
            merged.entry(key.to_string()).or_insert_with(|| value.clone());
        }
    }
    merged
}

// ============================================================================
// Timestamp parsing
// ============================================================================

/// Parse RFC 3339 timestamps, naive datetimes, or plain dates (midnight UTC)
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// Attribute map whose scalar values are kept as text; nulls are dropped
fn deserialize_attributes<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;
    let mut attributes = BTreeMap::new();
    for (key, value) in raw.unwrap_or_default() {
        let text = match value {
            Value::Null => continue,
            Value::String(s) => s,
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Array(_) | Value::Object(_) => {
                return Err(serde::de::Error::custom(format!(
                    "attribute '{key}' must be a string, number or boolean"
                )))
            }
        };
        attributes.insert(key, text);
    }
    Ok(attributes)
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unparseable timestamp: {raw}")))
}

fn deserialize_optional_timestamp<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("unparseable timestamp: {raw}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "document_id": "playbook-2025-01-06",
        "timestamp": "2025-01-06",
        "people": [
            {"name": "Sen. John Thune", "category": "political_official", "confidence": 0.9,
             "role": "Senate Majority Leader", "context": "Thune told reporters"},
            {"category": "journalist", "confidence": 0.8}
        ],
        "relationships": [
            {"subject": "John Thune", "predicate": "met with", "object": "Donald Trump",
             "confidence": 0.9, "timestamp": "2025-01-05T15:00:00Z"}
        ],
        "organizations": [
            {"name": "Mastercard", "type": "corporation", "confidence": 0.95}
        ]
    }"#;

    #[test]
    fn test_parse_batch() {
        let batch = ExtractionBatch::from_json(SAMPLE).unwrap();
        assert_eq!(batch.document_id, "playbook-2025-01-06");
        assert_eq!(batch.record_count(), 4);
        assert_eq!(batch.timestamp.to_rfc3339(), "2025-01-06T00:00:00+00:00");
    }

    #[test]
    fn test_person_to_mention_lifts_top_level_attributes() {
        let batch = ExtractionBatch::from_json(SAMPLE).unwrap();
        let mention = batch.people[0].to_mention(&batch).unwrap();
        assert_eq!(mention.raw_name, "Sen. John Thune");
        assert_eq!(
            mention.attributes.get("role").map(String::as_str),
            Some("Senate Majority Leader")
        );
        assert_eq!(mention.timestamp, batch.timestamp);
    }

    #[test]
    fn test_missing_name_rejected() {
        let batch = ExtractionBatch::from_json(SAMPLE).unwrap();
        assert!(matches!(
            batch.people[1].to_mention(&batch),
            Err(PolnetError::Validation(_))
        ));
    }

    #[test]
    fn test_relationship_timestamp_override() {
        let batch = ExtractionBatch::from_json(SAMPLE).unwrap();
        let rel = &batch.relationships[0];
        assert_eq!(rel.timestamp_in(&batch).to_rfc3339(), "2025-01-05T15:00:00+00:00");
        let (subject, predicate, object) = rel.parts(&batch).unwrap();
        assert_eq!((subject.as_str(), predicate.as_str(), object.as_str()), ("John Thune", "met with", "Donald Trump"));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2025-01-06T10:00:00Z").is_some());
        assert!(parse_timestamp("2025-01-06T10:00:00").is_some());
        assert!(parse_timestamp("01/06/2025").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_mistyped_record_is_set_aside() {
        let batch = ExtractionBatch::from_json(
            r#"{
                "document_id": "doc-1",
                "timestamp": "2025-01-06",
                "people": [
                    {"name": "Mike Johnson", "confidence": 0.9},
                    {"name": "Hakeem Jeffries", "confidence": "high"},
                    {"name": "John Thune", "attributes": {"age": 52, "leader": true, "note": null}}
                ],
                "relationships": [
                    {"subject": "Mike Johnson", "predicate": "met with", "object": ["Thune"]}
                ]
            }"#,
        )
        .unwrap();

        let names: Vec<_> = batch.people.iter().filter_map(|p| p.name.as_deref()).collect();
        assert_eq!(names, vec!["Mike Johnson", "John Thune"]);
        assert!(batch.relationships.is_empty());
        assert_eq!(batch.record_count(), 4);

        let sections: Vec<_> = batch.malformed.iter().map(|m| (m.section, m.index)).collect();
        assert_eq!(
            sections,
            vec![(RecordSection::People, 1), (RecordSection::Relationships, 0)]
        );
        assert!(matches!(
            batch.malformed[0].to_error(&batch.document_id),
            PolnetError::Validation(msg) if msg.contains("people record 1")
        ));

        let thune = &batch.people[1].attributes;
        assert_eq!(thune.get("age").map(String::as_str), Some("52"));
        assert_eq!(thune.get("leader").map(String::as_str), Some("true"));
        assert!(!thune.contains_key("note"));
    }

    #[test]
    fn test_nested_attribute_rejects_record() {
        let batch = ExtractionBatch::from_json(
            r#"{"document_id": "doc-1", "timestamp": "2025-01-06",
                "organizations": [{"name": "Mastercard", "attributes": {"hq": {"city": "Purchase"}}}]}"#,
        )
        .unwrap();
        assert!(batch.organizations.is_empty());
        assert_eq!(batch.malformed[0].section, RecordSection::Organizations);
    }

    #[test]
    fn test_bad_document_timestamp_fails_batch() {
        let err = ExtractionBatch::from_json(
            r#"{"document_id": "doc-1", "timestamp": "someday", "people": []}"#,
        )
        .unwrap_err();
        assert!(matches!(err, PolnetError::Validation(_)));
    }

    #[test]
    fn test_empty_document_id_invalid() {
        let batch = ExtractionBatch::new("  ", Utc::now());
        assert!(batch.validate().is_err());
    }
}
