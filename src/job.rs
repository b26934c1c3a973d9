//! A single plugin invocation: bind, submit, poll, cancel.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    CLI_PATH,
    binder::{ArgumentValue, InputValidation, ResolvedParameterSet},
    client::{SharedApi, token_query},
    errors::{Error, Result, ValidationError},
    http::ApiResponse,
    schema::{PluginRef, PluginSchema, resolve_plugin},
    wildcard::resolve_arguments,
};

/// Girder job status. The numeric codes are Girder's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Inactive,
    Queued,
    Running,
    Success,
    Error,
    Canceled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Inactive,
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Success,
        JobStatus::Error,
        JobStatus::Canceled,
    ];

    pub fn code(&self) -> i64 {
        match self {
            JobStatus::Inactive => 0,
            JobStatus::Queued => 1,
            JobStatus::Running => 2,
            JobStatus::Success => 3,
            JobStatus::Error => 4,
            JobStatus::Canceled => 5,
        }
    }

    /// Map a status code. Girder worker's intermediate codes (fetching
    /// input, converting, pushing output, canceling) count as running.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0..=5 => Some(Self::ALL[code as usize]),
            820..=824 => Some(JobStatus::Running),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Error | JobStatus::Canceled
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, JobStatus::Error | JobStatus::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Inactive => "INACTIVE",
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Error => "ERROR",
            JobStatus::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Serializable description of one invocation, as found in job files.
///
/// Either `plugin_id` or both `docker_image` and `cli` must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli: Option<String>,
    #[serde(default)]
    pub input_args: Vec<ArgumentValue>,
}

impl JobSpec {
    pub fn by_id(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: Some(plugin_id.into()),
            ..Default::default()
        }
    }

    pub fn by_image(docker_image: impl Into<String>, cli: impl Into<String>) -> Self {
        Self {
            docker_image: Some(docker_image.into()),
            cli: Some(cli.into()),
            ..Default::default()
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.input_args.push(ArgumentValue::new(name, value));
        self
    }

    pub fn plugin_ref(&self) -> Result<PluginRef> {
        let non_empty = |v: &Option<String>| v.as_ref().filter(|s| !s.trim().is_empty()).cloned();
        if let Some(id) = non_empty(&self.plugin_id) {
            return Ok(PluginRef::Id(id));
        }
        match (non_empty(&self.docker_image), non_empty(&self.cli)) {
            (Some(docker_image), Some(cli)) => Ok(PluginRef::Image { docker_image, cli }),
            _ => Err(Error::Validation(
                ValidationError::new("plugin_id or both docker_image and cli are required")
                    .with_field("plugin_id"),
            )),
        }
    }
}

/// Result of a cancel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The cancel request was sent; the raw response is kept.
    Requested(ApiResponse),
    /// Nothing to cancel: the job was never submitted.
    NotStarted,
}

#[derive(Debug, Deserialize)]
struct JobResource {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    status: i64,
    #[serde(default)]
    log: Vec<String>,
}

/// Handle to one plugin invocation.
pub struct Job {
    api: SharedApi,
    plugin_id: String,
    schema: PluginSchema,
    parameters: ResolvedParameterSet,
    validation: InputValidation,
    job_id: Option<String>,
    last_status: Option<JobStatus>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("plugin_id", &self.plugin_id)
            .field("title", &self.schema.title)
            .field("job_id", &self.job_id)
            .field("last_status", &self.last_status)
            .finish_non_exhaustive()
    }
}

impl Job {
    /// Resolve the plugin schema and wildcard arguments, then bind.
    ///
    /// Fails with [`Error::SchemaUnavailable`] when the plugin cannot be
    /// found or its descriptor cannot be fetched, and with a lookup error
    /// when a wildcard argument does not resolve.
    pub fn new(api: SharedApi, spec: &JobSpec) -> Result<Self> {
        let plugin = spec.plugin_ref()?;
        let resolved = resolve_plugin(api.as_ref(), &plugin)?.ok_or_else(|| {
            Error::SchemaUnavailable {
                plugin: plugin.to_string(),
            }
        })?;
        let args = resolve_arguments(api.as_ref(), &spec.input_args)?;
        Ok(Self::from_schema(api, resolved.id, resolved.schema, &args))
    }

    /// Bind `args` against an already fetched schema.
    pub fn from_schema(
        api: SharedApi,
        plugin_id: impl Into<String>,
        schema: PluginSchema,
        args: &[ArgumentValue],
    ) -> Self {
        let parameters = ResolvedParameterSet::bind(&schema, args, api.as_ref());
        Self {
            api,
            plugin_id: plugin_id.into(),
            schema,
            parameters,
            validation: InputValidation::default(),
            job_id: None,
            last_status: None,
        }
    }

    pub fn with_validation(mut self, validation: InputValidation) -> Self {
        self.validation = validation;
        self
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn schema(&self) -> &PluginSchema {
        &self.schema
    }

    pub fn parameters(&self) -> &ResolvedParameterSet {
        &self.parameters
    }

    /// Remote job id, set once the run request succeeds.
    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    /// Last status read from the server; `None` before any read.
    pub fn last_status(&self) -> Option<JobStatus> {
        self.last_status
    }

    /// Schema title, or the plugin id for untitled plugins.
    pub fn title(&self) -> &str {
        self.schema.title.as_deref().unwrap_or(&self.plugin_id)
    }

    fn require_job_id(&self) -> Result<&str> {
        self.job_id.as_deref().ok_or_else(|| Error::NotSubmitted {
            plugin: self.plugin_id.clone(),
        })
    }

    /// Send the run request.
    ///
    /// A non-success response is returned as is and leaves the job
    /// unsubmitted; callers must check [`ApiResponse::is_success`].
    pub fn submit(&mut self) -> Result<ApiResponse> {
        if self.job_id.is_some() {
            return Err(Error::Validation(
                ValidationError::new("job has already been submitted").with_field("job_id"),
            ));
        }
        self.parameters.validate(self.validation)?;

        let mut query = token_query(self.api.as_ref());
        query.extend(self.parameters.to_query());
        let path = format!("{CLI_PATH}/{}/run", self.plugin_id);
        let resp = self.api.post(&path, &query)?;

        if resp.is_success() {
            let created: JobResource = resp.json()?;
            #[cfg(feature = "tracing")]
            tracing::debug!(plugin_id = %self.plugin_id, job_id = %created.id, "job submitted");
            self.last_status = JobStatus::from_code(created.status);
            self.job_id = Some(created.id);
        } else {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                plugin_id = %self.plugin_id,
                status = resp.status,
                body = %resp.body,
                "job submission rejected"
            );
        }
        Ok(resp)
    }

    /// Current status. An unsubmitted job is `INACTIVE` without a remote call.
    pub fn status(&mut self) -> Result<JobStatus> {
        let Some(job_id) = self.job_id.as_deref() else {
            return Ok(JobStatus::Inactive);
        };
        let resource: JobResource = self.api.get(&format!("job/{job_id}"), &[])?.into_json()?;
        let status =
            JobStatus::from_code(resource.status).ok_or(Error::UnknownStatus(resource.status))?;
        self.last_status = Some(status);
        Ok(status)
    }

    /// Log entries, each split into lines.
    pub fn logs(&self) -> Result<Vec<Vec<String>>> {
        let job_id = self.require_job_id()?;
        let resource: JobResource = self.api.get(&format!("job/{job_id}"), &[])?.into_json()?;
        Ok(resource
            .log
            .iter()
            .map(|entry| entry.split('\n').map(str::to_string).collect())
            .collect())
    }

    pub fn cancel(&self) -> Result<CancelOutcome> {
        let Some(job_id) = self.job_id.as_deref() else {
            return Ok(CancelOutcome::NotStarted);
        };
        let resp = self.api.put(&format!("job/{job_id}/cancel"), None)?;
        #[cfg(feature = "tracing")]
        tracing::debug!(job_id, status = resp.status, "cancel requested");
        Ok(CancelOutcome::Requested(resp))
    }

    /// Attach metadata to the remote job resource.
    pub fn tag_metadata(&self, metadata: &Value) -> Result<ApiResponse> {
        let job_id = self.require_job_id()?;
        self.api.put(&format!("job/{job_id}/metadata"), Some(metadata))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::Method;
    use serde_json::json;

    use super::*;
    use crate::mock::{
        MockGirder,
        fixtures::{job_resource, with_simple_plugin},
    };

    fn simple_job(api: MockGirder) -> (Arc<MockGirder>, Job) {
        let api = Arc::new(with_simple_plugin(api, "p1", "j1"));
        let job = Job::new(api.clone(), &JobSpec::by_id("p1").with_arg("input_image", "file1"))
            .expect("job");
        (api, job)
    }

    #[test]
    fn unsubmitted_status_is_inactive_without_remote_call() {
        let (api, mut job) = simple_job(MockGirder::new());
        let before = api.calls().len();
        for _ in 0..3 {
            assert_eq!(job.status().unwrap(), JobStatus::Inactive);
        }
        assert_eq!(api.calls().len(), before);
        assert!(job.job_id().is_none());
    }

    #[test]
    fn submit_posts_bound_parameters_and_captures_job_id() {
        let (api, mut job) = simple_job(MockGirder::new());
        let resp = job.submit().unwrap();
        assert!(resp.is_success());
        assert_eq!(job.job_id(), Some("j1"));

        let post = api
            .calls()
            .into_iter()
            .find(|c| c.method == Method::POST)
            .expect("run request");
        assert_eq!(post.path, "slicer_cli_web/cli/p1/run");
        assert_eq!(
            post.query,
            vec![
                ("token".to_string(), "mock-token".to_string()),
                ("input_image".to_string(), "file1".to_string()),
                ("threshold".to_string(), "150".to_string()),
                ("girderApiUrl".to_string(), "http://mock.local/api/v1".to_string()),
                ("girderToken".to_string(), "mock-token".to_string()),
            ]
        );
    }

    #[test]
    fn rejected_submission_is_returned_not_raised() {
        let api = MockGirder::new()
            .on_get("slicer_cli_web/cli/p1/xml", 200, crate::mock::fixtures::SIMPLE_DESCRIPTOR)
            .on_post("slicer_cli_web/cli/p1/run", 400, r#"{"message": "bad input", "type": "rest"}"#);
        let mut job = Job::new(Arc::new(api), &JobSpec::by_id("p1")).unwrap();
        let resp = job.submit().unwrap();
        assert_eq!(resp.status, 400);
        assert!(resp.body.contains("bad input"));
        assert!(job.job_id().is_none());
    }

    #[test]
    fn second_submit_is_rejected() {
        let (_api, mut job) = simple_job(MockGirder::new());
        job.submit().unwrap();
        assert!(matches!(job.submit(), Err(Error::Validation(_))));
    }

    #[test]
    fn strict_validation_blocks_submission() {
        let api = Arc::new(with_simple_plugin(MockGirder::new(), "p1", "j1"));
        let mut job = Job::new(api.clone(), &JobSpec::by_id("p1"))
            .unwrap()
            .with_validation(InputValidation::Strict);
        match job.submit() {
            Err(Error::MissingInputs(names)) => assert_eq!(names, vec!["input_image"]),
            other => panic!("expected missing inputs, got {other:?}"),
        }
        assert_eq!(api.count(Method::POST, "slicer_cli_web/cli/p1/run"), 0);
    }

    #[test]
    fn status_maps_remote_codes() {
        let api = MockGirder::new()
            .on_get_json("job/j1", job_resource("j1", JobStatus::Queued, &[]))
            .on_get_json("job/j1", json!({"_id": "j1", "status": 821}))
            .on_get_json("job/j1", job_resource("j1", JobStatus::Success, &[]));
        let (_api, mut job) = simple_job(api);
        job.submit().unwrap();
        assert_eq!(job.status().unwrap(), JobStatus::Queued);
        assert_eq!(job.status().unwrap(), JobStatus::Running);
        assert_eq!(job.status().unwrap(), JobStatus::Success);
        assert_eq!(job.last_status(), Some(JobStatus::Success));
    }

    #[test]
    fn unknown_status_code_is_an_error() {
        let api = MockGirder::new().on_get_json("job/j1", json!({"_id": "j1", "status": 42}));
        let (_api, mut job) = simple_job(api);
        job.submit().unwrap();
        assert!(matches!(job.status(), Err(Error::UnknownStatus(42))));
    }

    #[test]
    fn logs_are_split_into_lines() {
        let api = MockGirder::new().on_get_json(
            "job/j1",
            job_resource("j1", JobStatus::Running, &["starting\nloading model", "done"]),
        );
        let (_api, mut job) = simple_job(api);
        assert!(matches!(job.logs(), Err(Error::NotSubmitted { .. })));
        job.submit().unwrap();
        assert_eq!(
            job.logs().unwrap(),
            vec![
                vec!["starting".to_string(), "loading model".to_string()],
                vec!["done".to_string()]
            ]
        );
    }

    #[test]
    fn cancel_before_submit_is_a_no_op() {
        let (api, job) = simple_job(MockGirder::new());
        let before = api.calls().len();
        assert_eq!(job.cancel().unwrap(), CancelOutcome::NotStarted);
        assert_eq!(api.calls().len(), before);
    }

    #[test]
    fn cancel_after_submit_puts_cancel() {
        let api = MockGirder::new()
            .on_put_json("job/j1/cancel", job_resource("j1", JobStatus::Canceled, &[]));
        let (api, mut job) = simple_job(api);
        job.submit().unwrap();
        assert!(matches!(job.cancel().unwrap(), CancelOutcome::Requested(r) if r.is_success()));
        assert_eq!(api.count(Method::PUT, "job/j1/cancel"), 1);
    }

    #[test]
    fn missing_plugin_is_schema_unavailable() {
        let api = Arc::new(MockGirder::new().on_get_json("slicer_cli_web/cli", json!([])));
        let err = Job::new(api, &JobSpec::by_image("img:1", "Nope")).unwrap_err();
        assert!(matches!(err, Error::SchemaUnavailable { plugin } if plugin == "img:1#Nope"));
    }

    #[test]
    fn spec_requires_a_plugin_address() {
        let spec = JobSpec {
            docker_image: Some("img:1".into()),
            ..Default::default()
        };
        assert!(matches!(spec.plugin_ref(), Err(Error::Validation(_))));
    }

    #[test]
    fn wildcard_arguments_resolve_before_binding() {
        let api = with_simple_plugin(MockGirder::new(), "p1", "j1")
            .on_get_json("resource/lookup", json!({"_id": "item7"}));
        let spec = JobSpec::by_id("p1").with_arg(
            "input_image",
            "{{'type':'item','item_type':'path','item_query':'/collection/x/slide.svs'}}",
        );
        let job = Job::new(Arc::new(api), &spec).unwrap();
        assert_eq!(job.parameters().get("input_image"), Some(&json!("item7")));
    }
}
