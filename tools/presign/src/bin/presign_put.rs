/*!
 * presign_put: generates a presigned PUT URL for the given S3 bucket and key.
 *
 * The client is bound to the region's own endpoint (rather than the global
 * one) and signs with SigV4, which works for both long-lived and temporary
 * session credentials.  Credential resolution is bounded by short timeouts and
 * a small number of attempts so that a hung metadata service can't wedge the
 * command.
 *
 * Besides RUST_LOG and the AWS credential chain, the only environment variable
 * this tool looks at is RUST_LIB_BACKTRACE/RUST_BACKTRACE: if neither is set,
 * it sets RUST_LIB_BACKTRACE so that unexpected errors carry a stack trace.
 */

use anyhow::Context;
use clap::Parser;
use log::debug;
use log::warn;
use rusoto_core::Region;
use rusoto_credential::AwsCredentials;
use rusoto_credential::ChainProvider;
use rusoto_credential::CredentialsError;
use rusoto_credential::ProvideAwsCredentials;
use rusoto_s3::util::PreSignedRequest;
use rusoto_s3::util::PreSignedRequestOption;
use rusoto_s3::PutObjectRequest;
use std::backtrace::Backtrace;
use std::backtrace::BacktraceStatus;
use std::env;
use std::io;
use std::io::Write;
use std::process;
use std::time::Duration;
use thiserror::Error;

#[macro_use]
extern crate anyhow;

/* Longest lifetime SigV4 allows for a presigned URL (7 days). */
const MAX_EXPIRES_IN: u64 = 604_800;

#[derive(Debug, Parser)]
#[command(about = "Generate presigned PUT URL for S3", long_about = None)]
struct Args {
    /// S3 bucket name
    #[arg(long)]
    bucket: String,
    /// S3 object key
    #[arg(long)]
    key: String,
    /// AWS region
    #[arg(long)]
    region: String,
    /// URL expiration in seconds
    #[arg(long, default_value_t = 3600)]
    expires_in: u64,
}

#[derive(Debug, Error, PartialEq)]
enum InvalidRequest {
    #[error("bucket name must not be empty")]
    EmptyBucket,
    #[error("object key must not be empty")]
    EmptyKey,
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
    if args.expires_in == 0 || args.expires_in > MAX_EXPIRES_IN {
        return Err(InvalidRequest::Expiration(args.expires_in));
    }
    Ok(())
}

/**
 * Limits applied to the one step that may leave the host: resolving
 * credentials from the container or instance metadata services.
 */
#[derive(Clone, Copy, Debug)]
struct TransportConfig {
    connect_timeout: Duration,
    read_timeout: Duration,
    max_attempts: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            max_attempts: 2,
        }
    }
}

/*
 * Regions are not checked against a list: any DNS label (letters, digits and
 * interior hyphens, at most 63 characters) is accepted, so regions newer than
 * rusoto's table still work.
 */
fn validate_region(region_name: &str) -> Result<(), InvalidRequest> {
    let well_formed = !region_name.is_empty()
        && region_name.len() <= 63
        && region_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        && !region_name.starts_with('-')
        && !region_name.ends_with('-');
    if well_formed {
        Ok(())
    } else {
        Err(InvalidRequest::Region(region_name.to_string()))
    }
}

fn region_endpoint(region_name: &str) -> String {
    format!("https://s3.{}.amazonaws.com", region_name)
}

struct RegionalClient {
    region: Region,
    provider: ChainProvider,
    transport: TransportConfig,
}

fn regional_client(
    region_name: &str,
    transport: TransportConfig,
) -> Result<RegionalClient, anyhow::Error> {
    validate_region(region_name)?;
    let endpoint = region_endpoint(region_name);
    debug!("using regional endpoint {}", endpoint);
    let region = Region::Custom {
        name: region_name.to_string(),
        endpoint,
    };

    let mut provider = ChainProvider::new();
    provider.set_timeout(transport.read_timeout);

    Ok(RegionalClient {
        region,
        provider,
        transport,
    })
}

impl RegionalClient {
    async fn credentials(&self) -> Result<AwsCredentials, CredentialsError> {
        let deadline =
            self.transport.connect_timeout + self.transport.read_timeout;
        let mut last_error = CredentialsError::new("no attempts were made");

        for attempt in 1..=self.transport.max_attempts {
            debug!("resolving credentials (attempt {})", attempt);
            let result =
                tokio::time::timeout(deadline, self.provider.credentials())
                    .await;
            match result {
                Ok(Ok(creds)) => return Ok(creds),
                Ok(Err(error)) => last_error = error,
                Err(_) => {
                    last_error = CredentialsError::new(format!(
                        "timed out after {:?}",
                        deadline
                    ))
                }
            }
            warn!("attempt {} failed: {}", attempt, last_error);
        }

        Err(last_error)
    }
}

fn presign_put(
    region: &Region,
    creds: &AwsCredentials,
    bucket: &str,
    key: &str,
    expires_in: Duration,
) -> String {
    let put_request = PutObjectRequest {
        bucket: bucket.to_string(),
        key: key.to_string(),
        ..Default::default()
    };
    let opts = PreSignedRequestOption { expires_in };
    put_request.get_presigned_url(region, creds, &opts)
}

async fn generate(args: Args) -> Result<String, anyhow::Error> {
    validate(&args)?;
    let client = regional_client(&args.region, TransportConfig::default())?;
    let creds = client
        .credentials()
        .await
        .with_context(|| "resolving credentials")?;
    debug!("signing PUT for s3://{}/{}", args.bucket, args.key);
    Ok(presign_put(
        &client.region,
        &creds,
        &args.bucket,
        &args.key,
        Duration::from_secs(args.expires_in),
    ))
}

/**
 * Errors the provider layer reports about the request itself (bad region,
 * unusable credentials, rejected parameters), as opposed to failures of this
 * program.
 */
fn is_provider_error(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause.is::<CredentialsError>() || cause.is::<InvalidRequest>()
    })
}

/*
 * Unexpected errors always come with a stack trace: the one captured where the
 * error was created if there is one, otherwise the one at this point.
 */
fn report(error: &anyhow::Error) -> String {
    if is_provider_error(error) {
        return format!("Error generating presigned URL: {:#}", error);
    }
    if error.backtrace().status() == BacktraceStatus::Captured {
        format!("Unexpected error: {:?}", error)
    } else {
        format!(
            "Unexpected error: {:#}\n\nStack backtrace:\n{}",
            error,
            Backtrace::force_capture()
        )
    }
}

fn write_url<W: Write>(out: &mut W, url: &str) -> Result<(), anyhow::Error> {
    writeln!(out, "{}", url)
        .and_then(|()| out.flush())
        .with_context(|| "writing URL to stdout")
}

/*
 * Unexpected failures are reported with a stack trace.  anyhow only captures
 * one when asked to, so ask unless the user has already said otherwise.
 */
fn enable_backtraces() {
    if env::var_os("RUST_LIB_BACKTRACE").is_none()
        && env::var_os("RUST_BACKTRACE").is_none()
    {
        env::set_var("RUST_LIB_BACKTRACE", "1");
    }
}

fn main() {
    enable_backtraces();
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
