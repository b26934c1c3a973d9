//! Blocking client for running Slicer CLI plugins as Girder jobs, one at a
//! time or as ordered sequences.
//!
//! ```no_run
//! use std::sync::Arc;
//! use girder_job_sequence::{GirderClient, GirderConfig, JobSpec, RunOptions, Sequence};
//!
//! let api = Arc::new(GirderClient::new(GirderConfig::from_env())?);
//! let specs = vec![
//!     JobSpec::by_image("dsarchive/histomicstk:latest", "NucleiDetection")
//!         .with_arg("inputImageFile", "{{'type':'file','item_type':'_id','item_query':'65a0...','file_type':'fileName','file_query':'slide.svs'}}"),
//!     JobSpec::by_id("6512f0c1e4b0a1b2c3d4e5f6"),
//! ];
//! let mut sequence = Sequence::from_specs(api, &specs)?;
//! let report = sequence.run(&RunOptions::default())?;
//! assert!(report.succeeded());
//! # Ok::<(), girder_job_sequence::Error>(())
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(clippy::result_large_err)]

use std::time::Duration;

/// Default User-Agent header value.
pub(crate) const DEFAULT_CLIENT_HEADER: &str =
    concat!("girder-job-sequence/", env!("CARGO_PKG_VERSION"));

/// Default connection timeout (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default request timeout (60 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default delay between job status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// HTTP header carrying the Girder auth token.
pub const TOKEN_HEADER: &str = "Girder-Token";

pub const API_URL_ENV: &str = "GIRDER_API_URL";
pub const TOKEN_ENV: &str = "GIRDER_TOKEN";

pub(crate) const CLI_PATH: &str = "slicer_cli_web/cli";

/// Parameters injected into every run request so the plugin can call back
/// into the server.
pub const API_URL_PARAM: &str = "girderApiUrl";
pub const TOKEN_PARAM: &str = "girderToken";

mod binder;
mod blocking;
mod client;
mod errors;
mod http;
mod job;
mod jobfile;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod schema;
mod sequence;
mod wildcard;

pub use binder::{ArgumentValue, InputValidation, ResolvedParameter, ResolvedParameterSet};
pub use blocking::{GirderClient, GirderConfig};
pub use client::{GirderApi, Query, SharedApi};
pub use errors::{
    APIError, Error, Result, RetryMetadata, TransportError, TransportErrorKind, ValidationError,
};
pub use http::{ApiResponse, RetryConfig};
pub use job::{CancelOutcome, Job, JobSpec, JobStatus};
pub use jobfile::{Workload, load_job_file, parse_job_specs};
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockGirder, RecordedCall, fixtures};
pub use schema::{
    Constraints, ParameterGroup, ParameterInput, ParameterType, PluginRef, PluginSchema,
    ResolvedPlugin, fetch_schema, resolve_plugin, resolve_plugin_id,
};
pub use sequence::{
    CancelScope, JobLogs, JobOutcome, JobStatusEntry, LogScope, RunOptions, Sequence,
    SequenceReport,
};
pub use wildcard::{
    AnnotationLookup, FileLookup, Lookup, WildcardRef, is_wildcard, resolve_arguments,
    resolve_value,
};
