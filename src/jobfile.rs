//! Job files: JSON documents describing one invocation or an ordered list.
//!
//! ```json
//! [
//!   {"docker_image": "dsarchive/histomicstk:latest", "cli": "NucleiDetection",
//!    "input_args": [{"name": "inputImageFile", "value": "{{'type':'file', ...}}"}]},
//!   {"plugin_id": "6512f0...", "input_args": []}
//! ]
//! ```

use std::{fs, path::Path};

use serde::Deserialize;

use crate::{
    client::SharedApi,
    errors::{Error, Result, ValidationError},
    job::{Job, JobSpec},
    sequence::Sequence,
};

#[derive(Deserialize)]
#[serde(untagged)]
enum JobDocument {
    Many(Vec<JobSpec>),
    One(JobSpec),
}

/// Parse a job document: a single spec object or an array of specs.
pub fn parse_job_specs(text: &str) -> Result<Vec<JobSpec>> {
    let specs = match serde_json::from_str(text)? {
        JobDocument::Many(specs) => specs,
        JobDocument::One(spec) => vec![spec],
    };
    Ok(specs)
}

pub fn load_job_file(path: impl AsRef<Path>) -> Result<Vec<JobSpec>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    #[cfg(feature = "tracing")]
    tracing::debug!(path = %path.display(), "loading job file");
    parse_job_specs(&text)
}

/// What a job file turns into: one job, or a sequence for two or more.
#[derive(Debug)]
pub enum Workload {
    Single(Job),
    Sequence(Sequence),
}

impl Workload {
    pub fn from_specs(api: SharedApi, specs: &[JobSpec]) -> Result<Self> {
        match specs {
            [] => Err(Error::Validation(ValidationError::new(
                "job file contains no jobs",
            ))),
            [spec] => Ok(Workload::Single(Job::new(api, spec)?)),
            _ => Ok(Workload::Sequence(Sequence::from_specs(api, specs)?)),
        }
    }

    /// A single job runs as a one-element sequence.
    pub fn into_sequence(self) -> Sequence {
        match self {
            Workload::Single(job) => Sequence::new(vec![job]),
            Workload::Sequence(seq) => seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, sync::Arc};

    use super::*;
    use crate::mock::{MockGirder, fixtures::with_simple_plugin};

    #[test]
    fn single_object_and_array_both_parse() {
        let one = parse_job_specs(r#"{"plugin_id": "p1", "input_args": [{"name": "a", "value": 1}]}"#)
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].plugin_id.as_deref(), Some("p1"));
        assert_eq!(one[0].input_args[0].name, "a");

        let many = parse_job_specs(
            r#"[{"plugin_id": "p1"}, {"docker_image": "img:1", "cli": "Detect"}]"#,
        )
        .unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many[1].cli.as_deref(), Some("Detect"));
    }

    #[test]
    fn invalid_json_is_a_serialization_error() {
        assert!(matches!(parse_job_specs("[{"), Err(Error::Serialization(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            load_job_file("/definitely/not/here.json"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn load_reads_from_disk() {
        let path = std::env::temp_dir().join(format!("jobfile-{}.json", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(br#"[{"plugin_id": "p1"}, {"plugin_id": "p2"}]"#)
            .unwrap();
        let specs = load_job_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(specs.len(), 2);
    }

    #[test]
    fn workload_shape_follows_spec_count() {
        let api: SharedApi = Arc::new(with_simple_plugin(
            with_simple_plugin(MockGirder::new(), "p1", "j1"),
            "p2",
            "j2",
        ));

        let single = Workload::from_specs(api.clone(), &[JobSpec::by_id("p1")]).unwrap();
        assert!(matches!(single, Workload::Single(_)));
        assert_eq!(single.into_sequence().len(), 1);

        let both = Workload::from_specs(api.clone(), &[JobSpec::by_id("p1"), JobSpec::by_id("p2")])
            .unwrap();
        assert!(matches!(both, Workload::Sequence(ref s) if s.len() == 2));

        assert!(matches!(
            Workload::from_specs(api, &[]),
            Err(Error::Validation(_))
        ));
    }
}
