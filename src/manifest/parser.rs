//! Pipeline manifest parser: YAML text in, validated [`Pipeline`] out.
//!
//! Grounded in `original_source/shared/yaml_parser.py`'s validation rules,
//! re-expressed as a single recursive-descent pass over a [`serde_yaml::Value`]
//! rather than Python's ad hoc dict probing, plus the cycle check spec.md
//! §9 requires and the original did not perform.

use std::collections::{HashMap, HashSet};

use serde_yaml::Value;

use crate::error::{ParseError, ParseResult};
use crate::manifest::model::{
    ContainerJob, ConfirmationJob, GroupJob, JobRef, JobSpec, Pipeline, Step, TimerJob,
    DEFAULT_CONFIRMATION_TIMEOUT_SECS,
};

/// Parse and validate a pipeline manifest from YAML text.
pub fn parse(text: &str) -> ParseResult<Pipeline> {
    let doc: Value =
        serde_yaml::from_str(text).map_err(|e| ParseError::InvalidYaml(e.to_string()))?;

    let mapping = doc
        .as_mapping()
        .ok_or_else(|| ParseError::InvalidYaml("document is not a mapping".into()))?;

    let name = get_str(mapping, "name")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ParseError::MissingField("name".into()))?
        .to_string();

    let jobs_value = mapping
        .get(Value::String("jobs".into()))
        .ok_or_else(|| ParseError::MissingField("jobs".into()))?;
    let jobs_mapping = jobs_value
        .as_mapping()
        .ok_or_else(|| ParseError::InvalidJob {
            job: "jobs".into(),
            reason: "must be a mapping".into(),
        })?;

    let mut job_order = Vec::with_capacity(jobs_mapping.len());
    let mut jobs = HashMap::with_capacity(jobs_mapping.len());

    for (key, value) in jobs_mapping {
        let job_name = key
            .as_str()
            .ok_or_else(|| ParseError::InvalidYaml("job name must be a string".into()))?
            .to_string();
        let job_mapping = value.as_mapping().ok_or_else(|| ParseError::InvalidJob {
            job: job_name.clone(),
            reason: "must be a mapping".into(),
        })?;

        let spec = parse_job(&job_name, job_mapping)?;
        job_order.push(job_name.clone());
        jobs.insert(job_name, spec);
    }

    validate_references(&jobs)?;

    Ok(Pipeline {
        name,
        job_order,
        jobs,
    })
}

fn parse_job(job_name: &str, job: &serde_yaml::Mapping) -> ParseResult<JobSpec> {
    let job_type = get_str(job, "type").unwrap_or("default");

    match job_type {
        "timer" => parse_timer(job_name, job).map(JobSpec::Timer),
        "confirmation" => parse_confirmation(job_name, job).map(JobSpec::Confirmation),
        "job_group" => parse_group(job_name, job).map(JobSpec::Group),
        "default" => parse_container(job_name, job).map(JobSpec::Container),
        other => Err(ParseError::InvalidJob {
            job: job_name.into(),
            reason: format!("unknown job type '{other}'"),
        }),
    }
}

fn parse_timer(job_name: &str, job: &serde_yaml::Mapping) -> ParseResult<TimerJob> {
    let raw = job
        .get(Value::String("duration".into()))
        .ok_or_else(|| ParseError::InvalidJob {
            job: job_name.into(),
            reason: "timer job must set 'duration'".into(),
        })?;
    let duration_secs = coerce_non_negative_int(raw).ok_or_else(|| ParseError::InvalidJob {
        job: job_name.into(),
        reason: "'duration' must be a non-negative integer".into(),
    })?;
    Ok(TimerJob { duration_secs })
}

fn parse_confirmation(job_name: &str, job: &serde_yaml::Mapping) -> ParseResult<ConfirmationJob> {
    let message = get_str(job, "message")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ParseError::InvalidJob {
            job: job_name.into(),
            reason: "confirmation job must set non-empty 'message'".into(),
        })?
        .to_string();
    let timeout_secs = job
        .get(Value::String("timeout".into()))
        .and_then(coerce_non_negative_int)
        .unwrap_or(DEFAULT_CONFIRMATION_TIMEOUT_SECS);
    Ok(ConfirmationJob {
        message,
        timeout_secs,
    })
}

fn parse_group(job_name: &str, job: &serde_yaml::Mapping) -> ParseResult<GroupJob> {
    let jobs_list = job.get(Value::String("jobs".into())).and_then(Value::as_sequence);
    let groups_list = job
        .get(Value::String("job_groups".into()))
        .and_then(Value::as_sequence);

    if jobs_list.is_none() && groups_list.is_none() {
        return Err(ParseError::InvalidJob {
            job: job_name.into(),
            reason: "job_group must set 'jobs' or 'job_groups'".into(),
        });
    }

    let mut entries = Vec::new();
    for seq in [jobs_list, groups_list].into_iter().flatten() {
        for item in seq {
            entries.push(parse_job_ref(job_name, item)?);
        }
    }
    Ok(GroupJob { entries })
}

fn parse_job_ref(job_name: &str, item: &Value) -> ParseResult<JobRef> {
    if let Some(target) = item.as_str() {
        return Ok(JobRef {
            target: target.to_string(),
            is_necessary: false,
        });
    }
    if let Some(mapping) = item.as_mapping() {
        let target = get_str(mapping, "name")
            .ok_or_else(|| ParseError::InvalidJob {
                job: job_name.into(),
                reason: "group entry mapping must set 'name'".into(),
            })?
            .to_string();
        let is_necessary = mapping
            .get(Value::String("is_necessary".into()))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        return Ok(JobRef {
            target,
            is_necessary,
        });
    }
    Err(ParseError::InvalidJob {
        job: job_name.into(),
        reason: "group entry must be a string or mapping".into(),
    })
}

fn parse_container(job_name: &str, job: &serde_yaml::Mapping) -> ParseResult<ContainerJob> {
    let default_image = get_str(job, "image").map(str::to_string);

    let steps_value = job
        .get(Value::String("steps".into()))
        .ok_or_else(|| ParseError::InvalidJob {
            job: job_name.into(),
            reason: "must set 'steps'".into(),
        })?;
    let steps_seq = steps_value.as_sequence().ok_or_else(|| ParseError::InvalidJob {
        job: job_name.into(),
        reason: "'steps' must be a sequence".into(),
    })?;
    if steps_seq.is_empty() {
        return Err(ParseError::InvalidJob {
            job: job_name.into(),
            reason: "'steps' must be non-empty".into(),
        });
    }

    let mut steps = Vec::with_capacity(steps_seq.len());
    for (i, raw_step) in steps_seq.iter().enumerate() {
        let step_mapping = raw_step.as_mapping().ok_or_else(|| ParseError::InvalidJob {
            job: job_name.into(),
            reason: format!("step {i} must be a mapping"),
        })?;

        let run = get_str(step_mapping, "run")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ParseError::InvalidJob {
                job: job_name.into(),
                reason: format!("step {i} must set non-empty 'run'"),
            })?
            .to_string();
        let name = get_str(step_mapping, "name")
            .unwrap_or(Step::DEFAULT_NAME)
            .to_string();
        let image = get_str(step_mapping, "image").map(str::to_string);

        if default_image.is_none() && image.is_none() {
            return Err(ParseError::InvalidJob {
                job: job_name.into(),
                reason: format!(
                    "step '{name}' has no image and job has no default image"
                ),
            });
        }

        let env = step_mapping
            .get(Value::String("env".into()))
            .and_then(Value::as_mapping)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| {
                        Some((k.as_str()?.to_string(), value_to_string(v)))
                    })
                    .collect()
            })
            .unwrap_or_default();

        steps.push(Step {
            name,
            image,
            run,
            env,
        });
    }

    Ok(ContainerJob {
        default_image,
        steps,
    })
}

/// Cross-reference check (spec.md §4.1): every group entry must resolve
/// within the pipeline, and no group may transitively reference itself.
fn validate_references(jobs: &HashMap<String, JobSpec>) -> ParseResult<()> {
    for (name, spec) in jobs {
        if let JobSpec::Group(group) = spec {
            for entry in &group.entries {
                if !jobs.contains_key(&entry.target) {
                    return Err(ParseError::UnknownReference {
                        job: name.clone(),
                        target: entry.target.clone(),
                    });
                }
            }
        }
    }

    for name in jobs.keys() {
        let mut visiting = HashSet::new();
        detect_cycle(name, jobs, &mut visiting)?;
    }
    Ok(())
}

fn detect_cycle<'a>(
    name: &'a str,
    jobs: &'a HashMap<String, JobSpec>,
    visiting: &mut HashSet<&'a str>,
) -> ParseResult<()> {
    let Some(JobSpec::Group(group)) = jobs.get(name) else {
        return Ok(());
    };
    if !visiting.insert(name) {
        return Err(ParseError::CyclicReference(name.to_string()));
    }
    for entry in &group.entries {
        detect_cycle(&entry.target, jobs, visiting)?;
    }
    visiting.remove(name);
    Ok(())
}

fn get_str<'a>(mapping: &'a serde_yaml::Mapping, key: &str) -> Option<&'a str> {
    mapping.get(Value::String(key.into())).and_then(Value::as_str)
}

fn coerce_non_negative_int(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    if let Some(n) = value.as_i64() {
        return u64::try_from(n).ok();
    }
    value.as_str()?.parse::<u64>().ok()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sequential_pipeline_in_order() {
        let yaml = r#"
name: p
jobs:
  a:
    image: alpine
    steps:
      - run: "true"
  b:
    image: alpine
    steps:
      - run: "true"
"#;
        let pipeline = parse(yaml).unwrap();
        assert_eq!(pipeline.name, "p");
        assert_eq!(pipeline.list_jobs(), &["a", "b"]);
    }

    #[test]
    fn rejects_step_missing_image_with_no_job_default() {
        let yaml = r#"
name: p
jobs:
  a:
    steps:
      - run: "true"
"#;
        assert!(matches!(parse(yaml), Err(ParseError::InvalidJob { .. })));
    }

    #[test]
    fn timer_requires_duration() {
        let yaml = r#"
name: p
jobs:
  t:
    type: timer
"#;
        assert!(matches!(parse(yaml), Err(ParseError::InvalidJob { .. })));
    }

    #[test]
    fn confirmation_defaults_timeout() {
        let yaml = r#"
name: p
jobs:
  c:
    type: confirmation
    message: "proceed?"
"#;
        let pipeline = parse(yaml).unwrap();
        let JobSpec::Confirmation(c) = pipeline.get_job("c").unwrap() else {
            panic!("expected confirmation job");
        };
        assert_eq!(c.timeout_secs, DEFAULT_CONFIRMATION_TIMEOUT_SECS);
    }

    #[test]
    fn group_entries_accept_bare_strings_and_mappings() {
        let yaml = r#"
name: p
jobs:
  a:
    image: alpine
    steps: [{run: "true"}]
  b:
    image: alpine
    steps: [{run: "true"}]
  g:
    type: job_group
    jobs:
      - a
      - name: b
        is_necessary: true
"#;
        let pipeline = parse(yaml).unwrap();
        let JobSpec::Group(g) = pipeline.get_job("g").unwrap() else {
            panic!("expected group job");
        };
        assert!(!g.entries[0].is_necessary);
        assert!(g.entries[1].is_necessary);
    }

    #[test]
    fn rejects_unknown_group_reference() {
        let yaml = r#"
name: p
jobs:
  g:
    type: job_group
    jobs: [missing]
"#;
        assert!(matches!(
            parse(yaml),
            Err(ParseError::UnknownReference { .. })
        ));
    }

    #[test]
    fn rejects_cyclic_group_reference() {
        let yaml = r#"
name: p
jobs:
  g1:
    type: job_group
    jobs: [g2]
  g2:
    type: job_group
    jobs: [g1]
"#;
        assert!(matches!(parse(yaml), Err(ParseError::CyclicReference(_))));
    }
}
