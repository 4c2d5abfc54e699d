//! In-memory pipeline manifest model.
//!
//! Types here are produced only by [`crate::manifest::parser::parse`]; once
//! parsed a [`Pipeline`] is immutable and freely shared behind an `Arc`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A parsed, validated pipeline manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Display name from the manifest's top-level `name` field.
    pub name: String,
    /// Top-level job names, in manifest order.
    pub job_order: Vec<String>,
    /// All jobs in the manifest, keyed by name.
    pub jobs: HashMap<String, JobSpec>,
}

impl Pipeline {
    /// Look up a job by name.
    pub fn get_job(&self, name: &str) -> Option<&JobSpec> {
        self.jobs.get(name)
    }

    /// Top-level job names in declaration order (parser round-trip
    /// invariant: this equals the order of keys in the source manifest).
    pub fn list_jobs(&self) -> &[String] {
        &self.job_order
    }
}

/// One job definition, tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobSpec {
    Container(ContainerJob),
    Timer(TimerJob),
    Confirmation(ConfirmationJob),
    Group(GroupJob),
}

/// Container job: an ordered sequence of steps sharing an optional default image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerJob {
    pub default_image: Option<String>,
    pub steps: Vec<Step>,
}

/// Timer job: sleep for a fixed duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerJob {
    pub duration_secs: u64,
}

/// Confirmation job: post an interactive gate and suspend for a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationJob {
    pub message: String,
    pub timeout_secs: u64,
}

/// Default confirmation timeout when the manifest omits `timeout`.
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 300;

/// Group job: a set of peer jobs (or nested groups) executed concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupJob {
    pub entries: Vec<JobRef>,
}

/// One entry in a [`GroupJob`]: the referenced job/group name plus whether
/// its failure is necessary to abort the enclosing group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRef {
    pub target: String,
    pub is_necessary: bool,
}

/// A single command inside a [`ContainerJob`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub image: Option<String>,
    pub run: String,
    pub env: HashMap<String, String>,
}

impl Step {
    /// Name to use when the manifest omits `name`.
    pub const DEFAULT_NAME: &'static str = "unnamed";

    /// Resolve the effective image for this step, inheriting from the
    /// parent job's default image when the step sets none.
    pub fn resolve_image<'a>(&'a self, job_default: Option<&'a str>) -> Option<&'a str> {
        self.image.as_deref().or(job_default)
    }
}
