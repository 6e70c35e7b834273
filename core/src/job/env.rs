//! Environment-variable serialization for `JobDescription`.
//!
//! A detached worker cannot share memory with its launcher, so the
//! description must survive as a flat `name → string` mapping. The codec
//! is table-driven: one ordered list of `(field name, semantic kind)`
//! pairs, with an explicit encode/decode function per kind, used
//! identically by `to_env` and `from_env`. Lists and mappings use their
//! canonical JSON text encoding.

use std::collections::BTreeMap;

use crate::error::{JobError, Result};
use crate::job::{JobDescription, JobStatus};

/// Prefix for every serialized field, e.g. `JOBRIG_COMMAND`.
pub const ENV_PREFIX: &str = "JOBRIG_";

// ---------------------------------------------------------------------------
// Field table
// ---------------------------------------------------------------------------

/// Semantic kind of a serialized field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Str,
    Int,
    Float,
    StrList,
    StrMap,
    Status,
}

/// Every serialized field, in declaration order. `to_env` and `from_env`
/// both iterate exactly this table.
pub const FIELDS: &[(&str, FieldKind)] = &[
    ("command", FieldKind::Str),
    ("args", FieldKind::StrList),
    ("working_dir", FieldKind::Str),
    ("output_dir", FieldKind::Str),
    ("env", FieldKind::StrMap),
    ("priority", FieldKind::Int),
    ("description", FieldKind::Str),
    ("input_paths", FieldKind::StrList),
    ("gpu_num", FieldKind::Int),
    ("image", FieldKind::Str),
    ("job_id", FieldKind::Str),
    ("start_time", FieldKind::Str),
    ("end_time", FieldKind::Str),
    ("status", FieldKind::Status),
    ("exit_code", FieldKind::Int),
    ("pid", FieldKind::Int),
    ("error_message", FieldKind::Str),
];

// ---------------------------------------------------------------------------
// Typed values and per-kind codecs
// ---------------------------------------------------------------------------

/// A field value lifted out of (or about to be written into) a
/// `JobDescription`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Float(f64),
    StrList(Vec<String>),
    StrMap(BTreeMap<String, String>),
    Status(JobStatus),
}

/// Encode a typed value to its environment-variable text form.
pub fn encode(value: &FieldValue) -> String {
    match value {
        FieldValue::Str(s) => s.clone(),
        FieldValue::Int(n) => n.to_string(),
        FieldValue::Float(x) => x.to_string(),
        // serde_json never fails on string lists/maps.
        FieldValue::StrList(v) => serde_json::to_string(v).unwrap_or_default(),
        FieldValue::StrMap(m) => serde_json::to_string(m).unwrap_or_default(),
        FieldValue::Status(s) => s.as_str().to_string(),
    }
}

/// Decode environment-variable text back to a typed value.
pub fn decode(kind: FieldKind, text: &str) -> Result<FieldValue> {
    match kind {
        FieldKind::Str => Ok(FieldValue::Str(text.to_string())),
        FieldKind::Int => text
            .parse::<i64>()
            .map(FieldValue::Int)
            .map_err(|e| JobError::Validation(format!("bad integer '{}': {}", text, e))),
        FieldKind::Float => text
            .parse::<f64>()
            .map(FieldValue::Float)
            .map_err(|e| JobError::Validation(format!("bad float '{}': {}", text, e))),
        FieldKind::StrList => serde_json::from_str::<Vec<String>>(text)
            .map(FieldValue::StrList)
            .map_err(|e| JobError::Validation(format!("bad list '{}': {}", text, e))),
        FieldKind::StrMap => serde_json::from_str::<BTreeMap<String, String>>(text)
            .map(FieldValue::StrMap)
            .map_err(|e| JobError::Validation(format!("bad mapping '{}': {}", text, e))),
        FieldKind::Status => JobStatus::parse(text)
            .map(FieldValue::Status)
            .ok_or_else(|| JobError::Validation(format!("bad status '{}'", text))),
    }
}

// ---------------------------------------------------------------------------
// Field access
// ---------------------------------------------------------------------------

fn get_field(job: &JobDescription, name: &str) -> FieldValue {
    match name {
        "command" => FieldValue::Str(job.command.clone()),
        "args" => FieldValue::StrList(job.args.clone()),
        "working_dir" => FieldValue::Str(job.working_dir.clone()),
        "output_dir" => FieldValue::Str(job.output_dir.clone()),
        "env" => FieldValue::StrMap(job.env.clone()),
        "priority" => FieldValue::Int(job.priority),
        "description" => FieldValue::Str(job.description.clone()),
        "input_paths" => FieldValue::StrList(job.input_paths.clone()),
        "gpu_num" => FieldValue::Int(job.gpu_num),
        "image" => FieldValue::Str(job.image.clone()),
        "job_id" => FieldValue::Str(job.job_id.clone()),
        "start_time" => FieldValue::Str(job.start_time.clone()),
        "end_time" => FieldValue::Str(job.end_time.clone()),
        "status" => FieldValue::Status(job.status),
        "exit_code" => FieldValue::Int(job.exit_code),
        "pid" => FieldValue::Int(job.pid),
        "error_message" => FieldValue::Str(job.error_message.clone()),
        other => unreachable!("field '{}' not in table", other),
    }
}

fn set_field(job: &mut JobDescription, name: &str, value: FieldValue) {
    match (name, value) {
        ("command", FieldValue::Str(v)) => job.command = v,
        ("args", FieldValue::StrList(v)) => job.args = v,
        ("working_dir", FieldValue::Str(v)) => job.working_dir = v,
        ("output_dir", FieldValue::Str(v)) => job.output_dir = v,
        ("env", FieldValue::StrMap(v)) => job.env = v,
        ("priority", FieldValue::Int(v)) => job.priority = v,
        ("description", FieldValue::Str(v)) => job.description = v,
        ("input_paths", FieldValue::StrList(v)) => job.input_paths = v,
        ("gpu_num", FieldValue::Int(v)) => job.gpu_num = v,
        ("image", FieldValue::Str(v)) => job.image = v,
        ("job_id", FieldValue::Str(v)) => job.job_id = v,
        ("start_time", FieldValue::Str(v)) => job.start_time = v,
        ("end_time", FieldValue::Str(v)) => job.end_time = v,
        ("status", FieldValue::Status(v)) => job.status = v,
        ("exit_code", FieldValue::Int(v)) => job.exit_code = v,
        ("pid", FieldValue::Int(v)) => job.pid = v,
        ("error_message", FieldValue::Str(v)) => job.error_message = v,
        (other, value) => unreachable!("field '{}' cannot hold {:?}", other, value),
    }
}

/// Environment-variable name for a table field.
fn env_key(name: &str) -> String {
    format!("{}{}", ENV_PREFIX, name.to_uppercase())
}

// ---------------------------------------------------------------------------
// to_env / from_env
// ---------------------------------------------------------------------------

impl JobDescription {
    /// Serialize every field into `JOBRIG_*` environment variables.
    pub fn to_env(&self) -> BTreeMap<String, String> {
        FIELDS
            .iter()
            .map(|(name, _)| (env_key(name), encode(&get_field(self, name))))
            .collect()
    }

    /// Reconstruct a description from `JOBRIG_*` environment variables.
    ///
    /// Missing keys keep their defaults; keys outside the table (or
    /// without the prefix) are ignored.
    pub fn from_env(vars: &BTreeMap<String, String>) -> Result<JobDescription> {
        let mut job = JobDescription::new("");
        for (name, kind) in FIELDS {
            if let Some(text) = vars.get(&env_key(name)) {
                set_field(&mut job, name, decode(*kind, text)?);
            }
        }
        Ok(job)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> JobDescription {
        let mut job = JobDescription::new("python");
        job.args = vec!["-c".into(), "print('Hello, World!')".into()];
        job.working_dir = "/tmp".into();
        job.output_dir = "output".into();
        job.env.insert("EXAMPLE_ENV".into(), "value".into());
        job.priority = 5;
        job.description = "A test job".into();
        job.input_paths = vec!["cos://bucket/test.txt".into()];
        job.gpu_num = 2;
        job.image = "ml-backend".into();
        job
    }

    // -- Round trip --

    #[test]
    fn round_trip_preserves_all_fields() {
        let job = sample_job();
        let vars = job.to_env();
        let back = JobDescription::from_env(&vars).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn round_trip_preserves_runtime_fields() {
        let mut job = sample_job();
        job.job_id = "42".into();
        job.start_time = "2024-01-01T00:00:00Z".into();
        job.end_time = "2024-01-01T00:05:00Z".into();
        job.status = JobStatus::Failed;
        job.exit_code = 3;
        job.pid = 12345;
        job.error_message = "boom".into();

        let back = JobDescription::from_env(&job.to_env()).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn round_trip_of_defaults() {
        let job = JobDescription::new("echo");
        let back = JobDescription::from_env(&job.to_env()).unwrap();
        assert_eq!(back, job);
    }

    // -- Canonical encodings --

    #[test]
    fn known_keys_and_values() {
        let vars = sample_job().to_env();
        assert_eq!(vars["JOBRIG_COMMAND"], "python");
        assert_eq!(
            vars["JOBRIG_ARGS"],
            r#"["-c","print('Hello, World!')"]"#
        );
        assert_eq!(vars["JOBRIG_ENV"], r#"{"EXAMPLE_ENV":"value"}"#);
        assert_eq!(vars["JOBRIG_PRIORITY"], "5");
        assert_eq!(vars["JOBRIG_STATUS"], "pending");
        assert_eq!(vars["JOBRIG_PID"], "-1");
    }

    #[test]
    fn every_table_field_is_emitted() {
        let vars = sample_job().to_env();
        assert_eq!(vars.len(), FIELDS.len());
        for (name, _) in FIELDS {
            assert!(vars.contains_key(&env_key(name)), "missing {}", name);
        }
    }

    #[test]
    fn list_and_map_decode_to_identical_structure() {
        let list = FieldValue::StrList(vec!["-c".into(), "x".into()]);
        let text = encode(&list);
        assert_eq!(text, r#"["-c","x"]"#);
        assert_eq!(decode(FieldKind::StrList, &text).unwrap(), list);

        let mut m = BTreeMap::new();
        m.insert("k".into(), "v".into());
        let map = FieldValue::StrMap(m);
        let text = encode(&map);
        assert_eq!(decode(FieldKind::StrMap, &text).unwrap(), map);
    }

    // -- Per-kind codecs --

    #[test]
    fn scalar_codecs_round_trip() {
        for v in [
            FieldValue::Str("plain text".into()),
            FieldValue::Int(-7),
            FieldValue::Float(2.5),
            FieldValue::Status(JobStatus::Postprocessing),
        ] {
            let kind = match v {
                FieldValue::Str(_) => FieldKind::Str,
                FieldValue::Int(_) => FieldKind::Int,
                FieldValue::Float(_) => FieldKind::Float,
                FieldValue::Status(_) => FieldKind::Status,
                _ => unreachable!(),
            };
            assert_eq!(decode(kind, &encode(&v)).unwrap(), v);
        }
    }

    #[test]
    fn decode_rejects_malformed_values() {
        assert!(decode(FieldKind::Int, "seven").is_err());
        assert!(decode(FieldKind::Float, "").is_err());
        assert!(decode(FieldKind::StrList, "not json").is_err());
        assert!(decode(FieldKind::Status, "paused").is_err());
    }

    // -- Tolerance --

    #[test]
    fn from_env_ignores_foreign_keys() {
        let mut vars = sample_job().to_env();
        vars.insert("PATH".into(), "/usr/bin".into());
        vars.insert("JOBRIG_NOT_A_FIELD".into(), "x".into());
        let back = JobDescription::from_env(&vars).unwrap();
        assert_eq!(back, sample_job());
    }

    #[test]
    fn from_env_with_missing_keys_uses_defaults() {
        let mut vars = BTreeMap::new();
        vars.insert("JOBRIG_COMMAND".into(), "echo".into());
        let job = JobDescription::from_env(&vars).unwrap();
        assert_eq!(job.command, "echo");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.pid, -1);
        assert!(job.args.is_empty());
    }
}
