/*!
 * Runs the compiled presign_put and presign_upload_part binaries.  Credentials
 * come from the environment so that nothing here touches the network.
 */

use assert_cmd::prelude::*;
use std::process::Command;
use std::process::Output;

const ACCESS_KEY: &str = "AKIDEXAMPLE";
const SECRET_KEY: &str = "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY";

fn run(bin: &str, args: &[&str], session_token: Option<&str>) -> Output {
    let mut cmd = Command::cargo_bin(bin).unwrap();
    cmd.args(args)
        .env("AWS_ACCESS_KEY_ID", ACCESS_KEY)
        .env("AWS_SECRET_ACCESS_KEY", SECRET_KEY)
        .env_remove("AWS_SESSION_TOKEN")
        .env_remove("AWS_CREDENTIAL_EXPIRATION")
        .env_remove("RUST_LOG");
    if let Some(token) = session_token {
        cmd.env("AWS_SESSION_TOKEN", token);
    }
    cmd.output().unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).unwrap()
}

fn stderr(output: &Output) -> String {
    String::from_utf8(output.stderr.clone()).unwrap()
}

#[test]
fn put_prints_regional_url() {
    let output = run(
        "presign_put",
        &[
            "--bucket",
            "my-bucket",
            "--key",
            "path/to/obj",
            "--region",
            "us-east-1",
            "--expires-in",
            "600",
        ],
        None,
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let url = stdout(&output);
    let url = url.trim_end();
    assert_eq!(url.lines().count(), 1);
    assert!(url
        .starts_with("https://s3.us-east-1.amazonaws.com/my-bucket/path/to/obj?"));
    assert!(url.contains("X-Amz-Expires=600"));
    assert!(url.contains("X-Amz-Signature="));
}

#[test]
fn put_defaults_to_one_hour() {
    let output = run(
        "presign_put",
        &["--bucket", "b", "--key", "k", "--region", "us-west-2"],
        None,
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("X-Amz-Expires=3600"));
}

#[test]
fn put_embeds_session_token() {
    let output = run(
        "presign_put",
        &["--bucket", "b", "--key", "k", "--region", "us-west-2"],
        Some("sessiontoken"),
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("X-Amz-Security-Token=sessiontoken"));
}

#[test]
fn put_accepts_region_newer_than_sdk_table() {
    let output = run(
        "presign_put",
        &["--bucket", "my-bucket", "--key", "obj", "--region", "il-central-1"],
        None,
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output)
        .starts_with("https://s3.il-central-1.amazonaws.com/my-bucket/obj?"));
}

#[test]
fn put_missing_flag_is_usage_error() {
    let output =
        run("presign_put", &["--bucket", "b", "--region", "us-east-1"], None);
    assert_eq!(output.status.code(), Some(2));
    assert!(stdout(&output).is_empty());
    assert!(stderr(&output).contains("--key"));
}

#[test]
fn put_invalid_region_is_reported() {
    let output = run(
        "presign_put",
        &["--bucket", "b", "--key", "k", "--region", "not_a_region"],
        None,
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).is_empty());
    let err = stderr(&output);
    assert!(err.starts_with("Error generating presigned URL:"));
    assert!(!err.contains("Stack backtrace"));
}

#[test]
fn put_rejects_zero_expiration() {
    let output = run(
        "presign_put",
        &[
            "--bucket",
            "b",
            "--key",
            "k",
            "--region",
            "us-east-1",
            "--expires-in",
            "0",
        ],
        None,
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).is_empty());
    assert!(stderr(&output).contains("expiration"));
}

#[test]
fn part_prints_url_with_upload_parameters() {
    let output = run(
        "presign_upload_part",
        &[
            "--bucket",
            "my-bucket",
            "--key",
            "path/to/obj",
            "--upload-id",
            "exampleUploadId",
            "--part-number",
            "5",
            "--region",
            "us-west-2",
        ],
        None,
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let url = stdout(&output);
    assert!(url.starts_with("https://"));
    assert!(url.contains("/my-bucket/path/to/obj?"));
    assert!(url.contains("partNumber=5"));
    assert!(url.contains("uploadId=exampleUploadId"));
    assert!(url.contains("X-Amz-Expires=14400"));
}

#[test]
fn part_accepts_region_newer_than_sdk_table() {
    let output = run(
        "presign_upload_part",
        &[
            "--bucket",
            "my-bucket",
            "--key",
            "obj",
            "--upload-id",
            "u",
            "--part-number",
            "2",
            "--region",
            "ap-southeast-4",
        ],
        None,
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let url = stdout(&output);
    assert!(url.starts_with("https://s3.ap-southeast-4.amazonaws.com/"));
    assert!(url.contains("partNumber=2"));
}

#[test]
fn part_missing_part_number_is_usage_error() {
    let output = run(
        "presign_upload_part",
        &[
            "--bucket",
            "b",
            "--key",
            "k",
            "--upload-id",
            "u",
            "--region",
            "us-east-1",
        ],
        None,
    );
    assert_eq!(output.status.code(), Some(2));
    assert!(stdout(&output).is_empty());
    assert!(stderr(&output).contains("--part-number"));
}

#[test]
fn part_invalid_region_is_reported_without_backtrace() {
    let output = run(
        "presign_upload_part",
        &[
            "--bucket",
            "b",
            "--key",
            "k",
            "--upload-id",
            "u",
            "--part-number",
            "1",
            "--region",
            "not_a_region",
        ],
        None,
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).is_empty());
    let err = stderr(&output);
    assert!(err.starts_with("Error generating presigned URL:"));
    assert!(!err.contains("backtrace"));
}

#[test]
fn part_number_out_of_range_is_reported() {
    let output = run(
        "presign_upload_part",
        &[
            "--bucket",
            "b",
            "--key",
            "k",
            "--upload-id",
            "u",
            "--part-number",
            "10001",
            "--region",
            "us-east-1",
        ],
        None,
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).is_empty());
    assert!(stderr(&output).contains("part number"));
}
