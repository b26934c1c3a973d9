//! Blocking client tests against a mock Girder server.

use std::{sync::Arc, time::Duration};

use girder_job_sequence::{
    CancelOutcome, Error, GirderApi, GirderClient, GirderConfig, Job, JobOutcome, JobSpec,
    JobStatus, RetryConfig, RunOptions, Sequence, TransportErrorKind,
};
use serde_json::json;
use wiremock::matchers::{basic_auth, body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DESCRIPTOR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<executable>
  <title>Nuclei Detection</title>
  <parameters>
    <label>IO</label>
    <image>
      <name>inputImageFile</name>
      <label>Input Image</label>
      <channel>input</channel>
    </image>
    <double>
      <name>min_nucleus_area</name>
      <label>Minimum Nucleus Area</label>
      <default>80</default>
    </double>
  </parameters>
</executable>"#;

fn client(server: &MockServer) -> GirderClient {
    GirderClient::new(GirderConfig {
        api_url: Some(format!("{}/api/v1", server.uri())),
        token: Some("tok".to_string()),
        retry: Some(RetryConfig {
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            ..Default::default()
        }),
        ..Default::default()
    })
    .expect("client creation should succeed")
}

async fn mount_plugin(server: &MockServer, plugin_id: &str, job_id: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/slicer_cli_web/cli/{plugin_id}/xml")))
        .respond_with(ResponseTemplate::new(200).set_body_string(DESCRIPTOR))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/api/v1/slicer_cli_web/cli/{plugin_id}/run")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"_id": job_id, "status": 0})),
        )
        .expect(1)
        .mount(server)
        .await;
}

#[test]
fn login_exchanges_credentials_for_token() {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime should start");
    let server = rt.block_on(async { MockServer::start().await });

    rt.block_on(async {
        Mock::given(method("GET"))
            .and(path("/api/v1/user/authentication"))
            .and(basic_auth("admin", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "user": {"login": "admin"},
                "authToken": {"token": "issued-token", "expires": "2030-01-01T00:00:00Z"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/job/j1"))
            .and(header("Girder-Token", "issued-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_id": "j1", "status": 2})))
            .expect(1)
            .mount(&server)
            .await;
    });

    let client = GirderClient::login(
        GirderConfig {
            api_url: Some(format!("{}/api/v1", server.uri())),
            ..Default::default()
        },
        "admin",
        "secret",
    )
    .expect("login should succeed");
    assert_eq!(client.token(), "issued-token");

    let resp = client.get("job/j1", &[]).expect("request should succeed");
    assert!(resp.is_success());
}

#[test]
fn login_rejection_is_an_api_error() {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime should start");
    let server = rt.block_on(async { MockServer::start().await });

    rt.block_on(async {
        Mock::given(method("GET"))
            .and(path("/api/v1/user/authentication"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "message": "Login failed.",
                "type": "access"
            })))
            .mount(&server)
            .await;
    });

    let err = GirderClient::login(
        GirderConfig {
            api_url: Some(format!("{}/api/v1", server.uri())),
            ..Default::default()
        },
        "admin",
        "wrong",
    )
    .err()
    .expect("login should fail");
    match err {
        Error::Api(api) => {
            assert_eq!(api.status, 401);
            assert_eq!(api.message, "Login failed.");
        }
        other => panic!("expected api error, got {other:?}"),
    }
}

#[test]
fn job_submission_sends_token_and_bound_parameters() {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime should start");
    let server = rt.block_on(async { MockServer::start().await });
    let api_url = format!("{}/api/v1", server.uri());

    rt.block_on(async {
        Mock::given(method("GET"))
            .and(path("/api/v1/slicer_cli_web/cli"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"_id": "other", "image": "dsarchive/histomicstk:latest", "name": "ColorDeconvolution"},
                {"_id": "p1", "image": "dsarchive/histomicstk:latest", "name": "NucleiDetection"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/slicer_cli_web/cli/p1/xml"))
            .and(query_param("token", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DESCRIPTOR))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/slicer_cli_web/cli/p1/run"))
            .and(query_param("token", "tok"))
            .and(query_param("inputImageFile", "file-1"))
            .and(query_param("min_nucleus_area", "80"))
            .and(query_param("girderApiUrl", api_url.as_str()))
            .and(query_param("girderToken", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_id": "j1", "status": 1})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/job/j1/cancel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_id": "j1", "status": 5})))
            .expect(1)
            .mount(&server)
            .await;
    });

    let api = Arc::new(client(&server));
    let spec = JobSpec::by_image("dsarchive/histomicstk:latest", "NucleiDetection")
        .with_arg("inputImageFile", "file-1");
    let mut job = Job::new(api, &spec).expect("job should resolve");
    assert_eq!(job.plugin_id(), "p1");
    assert_eq!(job.title(), "Nuclei Detection");

    let resp = job.submit().expect("submit should succeed");
    assert!(resp.is_success());
    assert_eq!(job.job_id(), Some("j1"));
    assert_eq!(job.last_status(), Some(JobStatus::Queued));

    match job.cancel().expect("cancel should succeed") {
        CancelOutcome::Requested(resp) => assert_eq!(resp.status, 200),
        other => panic!("expected cancel request, got {other:?}"),
    }
}

#[test]
fn status_poll_retries_server_errors() {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime should start");
    let server = rt.block_on(async { MockServer::start().await });

    rt.block_on(async {
        Mock::given(method("GET"))
            .and(path("/api/v1/job/j1"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/job/j1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_id": "j1", "status": 3})))
            .mount(&server)
            .await;
    });

    let client = client(&server);
    let resp = client.get("job/j1", &[]).expect("request should succeed");
    assert_eq!(resp.status, 200);
}

#[test]
fn submission_is_not_retried() {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime should start");
    let server = rt.block_on(async { MockServer::start().await });

    rt.block_on(async {
        Mock::given(method("GET"))
            .and(path("/api/v1/slicer_cli_web/cli/p1/xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DESCRIPTOR))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/slicer_cli_web/cli/p1/run"))
            .respond_with(ResponseTemplate::new(503).set_body_string("worker unavailable"))
            .expect(1)
            .mount(&server)
            .await;
    });

    let mut job = Job::new(Arc::new(client(&server)), &JobSpec::by_id("p1")).expect("job");
    let resp = job.submit().expect("rejection is a response, not an error");
    assert_eq!(resp.status, 503);
    assert_eq!(resp.body, "worker unavailable");
    assert!(job.job_id().is_none());
}

#[test]
fn metadata_is_sent_as_json_body() {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime should start");
    let server = rt.block_on(async { MockServer::start().await });

    rt.block_on(async {
        Mock::given(method("PUT"))
            .and(path("/api/v1/job/j1/metadata"))
            .and(body_json(json!({"part_of": "abc"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
    });

    let client = client(&server);
    let resp = client
        .put("job/j1/metadata", Some(&json!({"part_of": "abc"})))
        .expect("request should succeed");
    assert!(resp.is_success());
}

#[test]
fn unreachable_server_is_a_transport_error() {
    let client = GirderClient::new(GirderConfig {
        api_url: Some("http://127.0.0.1:1/api/v1".to_string()),
        token: Some("tok".to_string()),
        retry: Some(RetryConfig::disabled()),
        connect_timeout: Some(Duration::from_millis(200)),
        ..Default::default()
    })
    .expect("client");

    match client.get("job/j1", &[]) {
        Err(Error::Transport(err)) => {
            assert!(matches!(
                err.kind,
                TransportErrorKind::Connect | TransportErrorKind::Timeout | TransportErrorKind::Other
            ));
        }
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[test]
fn failing_job_stops_the_sequence() {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime should start");
    let server = rt.block_on(async { MockServer::start().await });

    rt.block_on(async {
        mount_plugin(&server, "p1", "j1").await;
        mount_plugin(&server, "p2", "j2").await;
        Mock::given(method("GET"))
            .and(path("/api/v1/slicer_cli_web/cli/p3/xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DESCRIPTOR))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/slicer_cli_web/cli/p3/run"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v1/job/j1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_id": "j1", "status": 3})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/job/j2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_id": "j2", "status": 2})))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/job/j2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_id": "j2", "status": 4})))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
    });

    let api = Arc::new(client(&server));
    let specs: Vec<_> = ["p1", "p2", "p3"]
        .iter()
        .map(|id| JobSpec::by_id(*id).with_arg("inputImageFile", "file-1"))
        .collect();
    let mut sequence = Sequence::from_specs(api, &specs).expect("sequence");

    let report = sequence
        .run(&RunOptions::default().with_poll_interval(Duration::from_millis(5)))
        .expect("run should complete");

    assert_eq!(
        report.outcomes,
        vec![
            JobOutcome::Completed(JobStatus::Success),
            JobOutcome::Completed(JobStatus::Error),
            JobOutcome::NotRun,
        ]
    );
    assert!(report.stopped_early);
    assert!(sequence.jobs()[2].job_id().is_none());
}
