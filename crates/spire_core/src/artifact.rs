//! The compiled artifact: hook rules and job specs.
//!
//! An [`Artifact`] is built once from the artifact file and then shared
//! read-only. String-typed fields from the file (`timing`, `operation`) are
//! turned into closed enums here, so a typo fails the load instead of
//! silently never matching.

use crate::capability::CapabilitySet;
use crate::error::{CoreError, CoreResult};
use crate::record::Record;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// When a hook fires relative to the mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timing {
    /// Reserved, parsed but never executed
    Before,
    /// After a successful commit
    After,
    /// Reserved, parsed but never executed
    Around,
}

impl Timing {
    /// Whether hooks with this timing are executed by the runtime
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::After)
    }
}

/// Entity mutation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Record created
    Create,
    /// Record updated
    Update,
    /// Record deleted
    Delete,
}

impl Operation {
    /// Wire name of the operation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Topic that mutation broadcasts for this entity use, e.g. `Post:create`
    #[must_use]
    pub fn topic(&self, entity: &str) -> String {
        format!("{entity}:{}", self.as_str())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(CoreError::UnknownOperation(other.to_string())),
        }
    }
}

/// Binds an entity mutation to a list of jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookRule {
    /// Entity name
    pub entity: String,
    /// Hook timing
    pub timing: Timing,
    /// Mutation kind
    pub operation: Operation,
    /// Job names to dispatch, in order
    #[serde(default)]
    pub jobs: Vec<String>,
}

impl HookRule {
    /// Create an `after` hook
    #[must_use]
    pub fn after(entity: &str, operation: Operation, jobs: &[&str]) -> Self {
        Self {
            entity: entity.to_string(),
            timing: Timing::After,
            operation,
            jobs: jobs.iter().map(|j| (*j).to_string()).collect(),
        }
    }

    /// Set timing
    #[must_use]
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Check whether this rule fires for a committed mutation
    #[must_use]
    pub fn fires_for(&self, entity: &str, operation: Operation) -> bool {
        self.timing.is_active()
            && self.operation == operation
            && self.entity == entity
            && !self.jobs.is_empty()
    }
}

/// Copies one record field into the job input under another name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Field on the committed record
    pub source: String,
    /// Field name in the job input
    pub target: String,
}

/// A named unit of background work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    /// Job name, unique within the artifact
    pub name: String,
    /// Entity whose records feed this job
    pub input_entity: String,
    /// Declared capabilities
    #[serde(default)]
    pub capabilities: CapabilitySet,
    /// Entity the job writes to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_entity: Option<String>,
    /// Input projection, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_mappings: Option<Vec<FieldMapping>>,
}

impl JobSpec {
    /// Create a job spec with no capabilities
    #[must_use]
    pub fn new(name: &str, input_entity: &str) -> Self {
        Self {
            name: name.to_string(),
            input_entity: input_entity.to_string(),
            capabilities: CapabilitySet::new(),
            target_entity: None,
            field_mappings: None,
        }
    }

    /// Set capabilities
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set target entity
    #[must_use]
    pub fn with_target(mut self, entity: &str) -> Self {
        self.target_entity = Some(entity.to_string());
        self
    }

    /// Add a field mapping
    #[must_use]
    pub fn with_mapping(mut self, source: &str, target: &str) -> Self {
        self.field_mappings
            .get_or_insert_with(Vec::new)
            .push(FieldMapping {
                source: source.to_string(),
                target: target.to_string(),
            });
        self
    }

    /// Build the job input from a record snapshot.
    ///
    /// Without mappings the snapshot is returned whole. With mappings only
    /// the mapped fields are copied; missing sources are left out.
    #[must_use]
    pub fn project(&self, record: &Record) -> Record {
        match &self.field_mappings {
            None => record.clone(),
            Some(mappings) => mappings
                .iter()
                .filter_map(|m| {
                    record
                        .get(&m.source)
                        .map(|value| (m.target.clone(), value.clone()))
                })
                .collect(),
        }
    }
}

/// Wire shape of the artifact file
#[derive(Debug, Deserialize)]
struct ArtifactFile {
    #[serde(default)]
    name: String,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    hooks: Vec<HookRule>,
    #[serde(default)]
    jobs: Vec<JobSpec>,
}

/// Immutable compiled configuration snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifact {
    name: String,
    entities: Vec<String>,
    hooks: Vec<HookRule>,
    jobs: IndexMap<String, JobSpec>,
}

impl Artifact {
    /// Create an empty artifact
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Add a hook rule
    #[must_use]
    pub fn with_hook(mut self, hook: HookRule) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Add a job spec (replaces a job with the same name)
    #[must_use]
    pub fn with_job(mut self, job: JobSpec) -> Self {
        self.jobs.insert(job.name.clone(), job);
        self
    }

    /// Parse and validate an artifact file
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a valid artifact
    pub fn from_json(bytes: &[u8]) -> CoreResult<Self> {
        let file: ArtifactFile = serde_json::from_slice(bytes)?;

        let mut jobs = IndexMap::with_capacity(file.jobs.len());
        for (i, job) in file.jobs.into_iter().enumerate() {
            if job.name.is_empty() {
                return Err(CoreError::validation(format!("jobs[{i}].name"), "must not be empty"));
            }
            if job.input_entity.is_empty() {
                return Err(CoreError::validation(
                    format!("jobs[{i}].inputEntity"),
                    "must not be empty",
                ));
            }
            if jobs.contains_key(&job.name) {
                return Err(CoreError::AlreadyExists {
                    kind: "Job".to_string(),
                    id: job.name,
                });
            }
            jobs.insert(job.name.clone(), job);
        }

        let declared: HashSet<&str> = file.entities.iter().map(String::as_str).collect();
        for (i, hook) in file.hooks.iter().enumerate() {
            if hook.entity.is_empty() {
                return Err(CoreError::validation(
                    format!("hooks[{i}].entity"),
                    "must not be empty",
                ));
            }
            if !declared.is_empty() && !declared.contains(hook.entity.as_str()) {
                return Err(CoreError::validation(
                    format!("hooks[{i}].entity"),
                    format!("undeclared entity '{}'", hook.entity),
                ));
            }
        }

        Ok(Self {
            name: file.name,
            entities: file.entities,
            hooks: file.hooks,
            jobs,
        })
    }

    /// Artifact name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared entity names
    #[must_use]
    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    /// Hook rules in declaration order
    #[must_use]
    pub fn hooks(&self) -> &[HookRule] {
        &self.hooks
    }

    /// Look up a job by name
    #[must_use]
    pub fn job(&self, name: &str) -> Option<&JobSpec> {
        self.jobs.get(name)
    }

    /// Number of jobs
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}
