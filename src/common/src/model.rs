//! Domain types shared by the indexer and the purger.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{ErrorKind, MalformedKeyError};

/// Opaque identifier of a data subject (user or customer id).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// URI-like reference to a stored object: `scheme://bucket/key`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectRef {
    scheme: String,
    bucket: String,
    key: String,
}

impl ObjectRef {
    pub fn new(
        scheme: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<Self, MalformedKeyError> {
        let (scheme, bucket, key) = (scheme.into(), bucket.into(), key.into());
        if scheme.is_empty() || bucket.is_empty() || key.is_empty() {
            return Err(MalformedKeyError::new(
                format!("{scheme}://{bucket}/{key}"),
                "scheme, bucket and key must be non-empty",
            ));
        }
        Ok(Self {
            scheme,
            bucket,
            key,
        })
    }

    /// Parse `scheme://bucket/key`.
    pub fn parse(uri: &str) -> Result<Self, MalformedKeyError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| MalformedKeyError::new(uri, "missing scheme"))?;
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(MalformedKeyError::new(uri, "invalid scheme"));
        }
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| MalformedKeyError::new(uri, "missing object key"))?;
        if bucket.is_empty() {
            return Err(MalformedKeyError::new(uri, "missing bucket"));
        }
        if key.is_empty() {
            return Err(MalformedKeyError::new(uri, "missing object key"));
        }
        Ok(Self {
            scheme: scheme.to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Last `/`-separated segment of the key; empty when the key ends with `/`.
    pub fn final_segment(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or_default()
    }

    /// Same key in another bucket.
    pub fn with_bucket(&self, bucket: impl Into<String>) -> Self {
        Self {
            scheme: self.scheme.clone(),
            bucket: bucket.into(),
            key: self.key.clone(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key)
    }
}

impl FromStr for ObjectRef {
    type Err = MalformedKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ObjectRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ObjectRef::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// The lines a subject owns inside one shared object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineLocation {
    pub object_ref: ObjectRef,
    /// 0-based line offsets, ordered
    pub offsets: BTreeSet<u64>,
}

/// Everything to purge for one subject, as captured at report time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntry {
    pub subject_id: SubjectId,
    #[serde(default)]
    pub whole_object_locations: Vec<ObjectRef>,
    #[serde(default)]
    pub line_locations: Vec<LineLocation>,
}

impl ReportEntry {
    pub fn is_empty(&self) -> bool {
        self.whole_object_locations.is_empty() && self.line_locations.is_empty()
    }
}

/// Immutable snapshot of the locations approved for purging.
///
/// Serialises as a bare JSON array of entries.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurgeReport {
    entries: Vec<ReportEntry>,
}

impl PurgeReport {
    pub fn new(entries: Vec<ReportEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn subjects(&self) -> impl Iterator<Item = &SubjectId> {
        self.entries.iter().map(|e| &e.subject_id)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// A purged or failed location in a purge result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PurgedLocation {
    Object(ObjectRef),
    Lines(LineLocation),
}

impl fmt::Display for PurgedLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurgedLocation::Object(object) => write!(f, "{object}"),
            PurgedLocation::Lines(lines) => {
                let offsets: Vec<String> = lines.offsets.iter().map(u64::to_string).collect();
                write!(f, "{}#lines={}", lines.object_ref, offsets.join(","))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedLocation {
    pub location: PurgedLocation,
    pub error_kind: ErrorKind,
    pub message: String,
}

/// Per-subject purge progress.
///
/// `Pending → PartiallyPurged → FullyPurged`, or
/// `Pending → PartiallyPurged → FailedRemainder` once retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectPurgeStatus {
    Pending,
    PartiallyPurged,
    FullyPurged,
    FailedRemainder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectOutcome {
    pub subject_id: SubjectId,
    pub status: SubjectPurgeStatus,
    pub purged_locations: Vec<PurgedLocation>,
    pub failed_locations: Vec<FailedLocation>,
}

impl SubjectOutcome {
    pub fn new(subject_id: SubjectId) -> Self {
        Self {
            subject_id,
            status: SubjectPurgeStatus::Pending,
            purged_locations: Vec::new(),
            failed_locations: Vec::new(),
        }
    }

    pub fn record_purged(&mut self, location: PurgedLocation) {
        self.purged_locations.push(location);
        self.status = SubjectPurgeStatus::PartiallyPurged;
    }

    pub fn record_failed(
        &mut self,
        location: PurgedLocation,
        error_kind: ErrorKind,
        message: String,
    ) {
        self.failed_locations.push(FailedLocation {
            location,
            error_kind,
            message,
        });
        self.status = SubjectPurgeStatus::PartiallyPurged;
    }

    /// Settle the terminal status once every location was attempted.
    pub fn finish(&mut self) {
        self.status = if self.failed_locations.is_empty() {
            SubjectPurgeStatus::FullyPurged
        } else {
            SubjectPurgeStatus::FailedRemainder
        };
    }

    pub fn is_fully_purged(&self) -> bool {
        self.status == SubjectPurgeStatus::FullyPurged
    }
}

/// Per-subject outcome of executing a purge report.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurgeResult {
    pub subjects: Vec<SubjectOutcome>,
}

impl PurgeResult {
    pub fn get(&self, subject: &SubjectId) -> Option<&SubjectOutcome> {
        self.subjects.iter().find(|o| &o.subject_id == subject)
    }

    pub fn failed_count(&self) -> usize {
        self.subjects
            .iter()
            .map(|o| o.failed_locations.len())
            .sum()
    }

    /// Subjects that still have locations left to purge.
    pub fn unfinished_count(&self) -> usize {
        self.subjects
            .iter()
            .filter(|o| !o.is_fully_purged())
            .count()
    }

    pub fn purged_count(&self) -> usize {
        self.subjects
            .iter()
            .map(|o| o.purged_locations.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ref_parse() {
        let object = ObjectRef::parse("s3://bucket/path/to/42-report.csv").unwrap();
        assert_eq!(object.scheme(), "s3");
        assert_eq!(object.bucket(), "bucket");
        assert_eq!(object.key(), "path/to/42-report.csv");
        assert_eq!(object.final_segment(), "42-report.csv");
        assert_eq!(object.to_string(), "s3://bucket/path/to/42-report.csv");
    }

    #[test]
    fn test_object_ref_rejects_malformed() {
        for uri in [
            "bucket/key",
            "://bucket/key",
            "s3://bucket",
            "s3://bucket/",
            "s3:///key",
            "s 3://bucket/key",
        ] {
            assert!(ObjectRef::parse(uri).is_err(), "{uri} should be rejected");
        }
    }

    #[test]
    fn test_final_segment_of_directory_key() {
        let object = ObjectRef::parse("s3://bucket/dir/").unwrap();
        assert_eq!(object.final_segment(), "");
    }

    #[test]
    fn test_with_bucket_keeps_key() {
        let object = ObjectRef::parse("s3://raw/shared/part-0.json").unwrap();
        let moved = object.with_bucket("purged");
        assert_eq!(moved.to_string(), "s3://purged/shared/part-0.json");
    }

    #[test]
    fn test_purge_report_wire_format() {
        let json = r#"[
            {
                "subjectId": "42",
                "wholeObjectLocations": ["s3://b/42-a.json"],
                "lineLocations": [{"objectRef": "s3://b/shared.json", "offsets": [3, 1]}]
            },
            {"subjectId": "7"}
        ]"#;

        let report = PurgeReport::from_json(json.as_bytes()).unwrap();
        assert_eq!(report.len(), 2);

        let first = &report.entries()[0];
        assert_eq!(first.subject_id, SubjectId::from("42"));
        assert_eq!(first.whole_object_locations.len(), 1);
        let offsets: Vec<u64> = first.line_locations[0].offsets.iter().copied().collect();
        assert_eq!(offsets, vec![1, 3]);

        assert!(report.entries()[1].is_empty());

        let json = report.to_json().unwrap();
        let round_trip = PurgeReport::from_json(json.as_bytes()).unwrap();
        assert_eq!(round_trip, report);
    }

    #[test]
    fn test_purge_report_rejects_bad_location() {
        let json = r#"[{"subjectId": "42", "wholeObjectLocations": ["not-a-uri"]}]"#;
        assert!(PurgeReport::from_json(json.as_bytes()).is_err());
    }

    #[test]
    fn test_subject_outcome_state_machine() {
        let object = ObjectRef::parse("s3://b/42-a.json").unwrap();

        let mut outcome = SubjectOutcome::new(SubjectId::from("42"));
        assert_eq!(outcome.status, SubjectPurgeStatus::Pending);

        outcome.record_purged(PurgedLocation::Object(object.clone()));
        assert_eq!(outcome.status, SubjectPurgeStatus::PartiallyPurged);
        outcome.finish();
        assert_eq!(outcome.status, SubjectPurgeStatus::FullyPurged);

        let mut failing = SubjectOutcome::new(SubjectId::from("43"));
        failing.record_failed(
            PurgedLocation::Object(object),
            ErrorKind::StorageDelete,
            "denied".to_string(),
        );
        failing.finish();
        assert_eq!(failing.status, SubjectPurgeStatus::FailedRemainder);
    }

    #[test]
    fn test_purge_result_wire_format() {
        let mut outcome = SubjectOutcome::new(SubjectId::from("42"));
        outcome.record_failed(
            PurgedLocation::Object(ObjectRef::parse("s3://b/42-a.json").unwrap()),
            ErrorKind::StorageDelete,
            "denied".to_string(),
        );
        outcome.finish();
        let result = PurgeResult {
            subjects: vec![outcome],
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value[0]["subjectId"], "42");
        assert_eq!(value[0]["status"], "FailedRemainder");
        assert_eq!(
            value[0]["failedLocations"][0]["location"],
            "s3://b/42-a.json"
        );
        assert_eq!(
            value[0]["failedLocations"][0]["errorKind"],
            "StorageDeleteError"
        );
        assert_eq!(result.failed_count(), 1);
    }

    #[test]
    fn test_unfinished_count_counts_subjects() {
        let object = |uri: &str| PurgedLocation::Object(ObjectRef::parse(uri).unwrap());

        let mut failing = SubjectOutcome::new(SubjectId::from("42"));
        for uri in ["s3://b/42-a.json", "s3://b/42-b.json"] {
            failing.record_failed(object(uri), ErrorKind::StorageDelete, "denied".to_string());
        }
        failing.finish();
        let mut purged = SubjectOutcome::new(SubjectId::from("43"));
        purged.record_purged(object("s3://b/43-a.json"));
        purged.finish();

        let result = PurgeResult {
            subjects: vec![failing, purged],
        };
        assert_eq!(result.failed_count(), 2);
        assert_eq!(result.unfinished_count(), 1);
        assert_eq!(result.purged_count(), 1);
    }

    #[test]
    fn test_purged_lines_display() {
        let location = PurgedLocation::Lines(LineLocation {
            object_ref: ObjectRef::parse("s3://b/shared.json").unwrap(),
            offsets: [3, 1].into_iter().collect(),
        });
        assert_eq!(location.to_string(), "s3://b/shared.json#lines=1,3");
    }
}
