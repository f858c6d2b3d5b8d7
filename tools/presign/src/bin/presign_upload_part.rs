/*!
 * presign_upload_part: generates a presigned URL for uploading one part of a
 * multipart upload that has already been initiated.
 *
 * Unlike presign_put, this uses the default endpoint for the region and the
 * default credential chain as-is.  Callers of part URLs are expected to do
 * their own timeout and retry handling.
 */

use anyhow::Context;
use clap::Parser;
use log::debug;
use rusoto_core::Region;
use rusoto_credential::AwsCredentials;
use rusoto_credential::ChainProvider;
use rusoto_credential::CredentialsError;
use rusoto_credential::ProvideAwsCredentials;
use rusoto_s3::util::PreSignedRequest;
use rusoto_s3::util::PreSignedRequestOption;
use rusoto_s3::UploadPartRequest;
use std::io;
use std::io::Write;
use std::process;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[macro_use]
extern crate anyhow;

const MAX_EXPIRES_IN: u64 = 604_800;
const MAX_PART_NUMBER: i64 = 10_000;

#[derive(Debug, Parser)]
#[command(
    about = "Generate presigned URL for S3 multipart upload part",
    long_about = None
)]
struct Args {
    /// S3 bucket name
    #[arg(long)]
    bucket: String,
    /// S3 object key
    #[arg(long)]
    key: String,
    /// Multipart upload ID
    #[arg(long)]
    upload_id: String,
    /// Part number
    #[arg(long)]
    part_number: i64,
    /// AWS region
    #[arg(long)]
    region: String,
    /// URL expiration in seconds
    #[arg(long, default_value_t = 14400)]
    expires_in: u64,
}

#[derive(Debug, Error, PartialEq)]
enum InvalidRequest {
    #[error("bucket name must not be empty")]
    EmptyBucket,
    #[error("object key must not be empty")]
    EmptyKey,
    #[error("upload id must not be empty")]
    EmptyUploadId,
    #[error("part number must be between 1 and 10000 (got {0})")]
    PartNumber(i64),
    #[error("expiration must be between 1 and 604800 seconds (got {0})")]
    Expiration(u64),
    #[error("malformed region {0:?}")]
    Region(String),
}

fn validate(args: &Args) -> Result<(), InvalidRequest> {
    if args.bucket.is_empty() {
        return Err(InvalidRequest::EmptyBucket);
    }
    if args.key.is_empty() {
        return Err(InvalidRequest::EmptyKey);
    }
    if args.upload_id.is_empty() {
        return Err(InvalidRequest::EmptyUploadId);
    }
    if args.part_number < 1 || args.part_number > MAX_PART_NUMBER {
        return Err(InvalidRequest::PartNumber(args.part_number));
    }
    if args.expires_in == 0 || args.expires_in > MAX_EXPIRES_IN {
        return Err(InvalidRequest::Expiration(args.expires_in));
    }
    Ok(())
}

struct DefaultClient {
    region: Region,
    provider: ChainProvider,
}

fn is_dns_label(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

/*
 * Regions rusoto knows keep its default endpoint.  Other well-formed region
 * ids (newer than rusoto's table) get the standard s3.<region> host.
 */
fn default_client(
    region_name: &str,
) -> Result<DefaultClient, InvalidRequest> {
    if !is_dns_label(region_name) {
        return Err(InvalidRequest::Region(region_name.to_string()));
    }
    let region = Region::from_str(region_name).unwrap_or_else(|_| {
        debug!("region {} not known to rusoto, using s3 host", region_name);
        Region::Custom {
            name: region_name.to_string(),
            endpoint: format!("https://s3.{}.amazonaws.com", region_name),
        }
    });
    Ok(DefaultClient {
        region,
        provider: ChainProvider::new(),
    })
}

fn presign_upload_part(
    region: &Region,
    creds: &AwsCredentials,
    bucket: &str,
    key: &str,
    upload_id: &str,
    part_number: i64,
    expires_in: Duration,
) -> String {
    let part_request = UploadPartRequest {
        bucket: bucket.to_string(),
        key: key.to_string(),
        upload_id: upload_id.to_string(),
        part_number,
        ..Default::default()
    };
    let opts = PreSignedRequestOption { expires_in };
    part_request.get_presigned_url(region, creds, &opts)
}

async fn generate(args: Args) -> Result<String, anyhow::Error> {
    validate(&args)?;
    let client = default_client(&args.region)?;
    let creds = client
        .provider
        .credentials()
        .await
        .with_context(|| "resolving credentials")?;
    debug!(
        "signing part {} of upload {} for s3://{}/{}",
        args.part_number, args.upload_id, args.bucket, args.key
    );
    Ok(presign_upload_part(
        &client.region,
        &creds,
        &args.bucket,
        &args.key,
        &args.upload_id,
        args.part_number,
        Duration::from_secs(args.expires_in),
    ))
}

fn is_provider_error(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause.is::<CredentialsError>() || cause.is::<InvalidRequest>()
    })
}

/* Neither kind of error is reported with a backtrace. */
fn report(error: &anyhow::Error) -> String {
    if is_provider_error(error) {
        format!("Error generating presigned URL: {:#}", error)
    } else {
        format!("Unexpected error: {:#}", error)
    }
}

fn write_url<W: Write>(out: &mut W, url: &str) -> Result<(), anyhow::Error> {
    writeln!(out, "{}", url)
        .and_then(|()| out.flush())
        .with_context(|| "writing URL to stdout")
}

fn main() {
    let _ = env_logger::try_init();

    let args = Args::parse();

    let result = tokio::runtime::Builder::new()
        .basic_scheduler()
        .enable_all()
        .build()
        .map_err(anyhow::Error::from)
        .and_then(|mut runtime| runtime.block_on(generate(args)))
        .and_then(|url| write_url(&mut io::stdout().lock(), &url));

    if let Err(error) = result {
        eprintln!("{}", report(&error));
        process::exit(1);
    }
}
