// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use bytes::Bytes;
use clap::Parser;
use s3gate::auth::file_auth::FileCredentials;
use s3gate::auth::{AuthClient, StaticAuthClient};
use s3gate::config::Config;
use s3gate::kvs::in_memory::InMemoryKvs;
use s3gate::observability::{metrics, tracing_setup};
use s3gate::ops::{self, Inbound, OperationContext};
use s3gate::shutdown::ShutdownSignal;
use s3gate::transport::recording::RecordingRequest;
use s3gate::transport::RequestTransport;
use s3gate::{Action, EventLoop, LoopHandle};
use std::rc::Rc;

#[derive(Parser, Debug)]
#[command(name = "s3gate")]
#[command(about = "Request engine and bucket metadata layer of an S3-compatible gateway", long_about = None)]
struct Args {
    /// Path to configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// Path to credentials file (overrides config)
    #[arg(short, long)]
    auth_file: Option<String>,

    /// Access key to sign the walkthrough requests with
    #[arg(long, default_value = "AK-demo")]
    access_key: String,

    /// Secret key to sign the walkthrough requests with
    #[arg(long, default_value = "demo-secret")]
    secret_key: String,

    /// Account the walkthrough acts as when no credentials file is used
    #[arg(long, default_value = "demo")]
    account: String,

    /// Bucket the walkthrough creates
    #[arg(short, long, default_value = "demo-bucket")]
    bucket: String,

    /// Print Prometheus metrics after the walkthrough
    #[arg(long)]
    metrics: bool,
}

/// Builds the auth client for one request.
enum Authenticator {
    Static(String),
    File {
        creds: FileCredentials,
        access_key: String,
        secret_key: String,
    },
}

impl Authenticator {
    fn client(&self, handle: &LoopHandle) -> Rc<dyn AuthClient> {
        match self {
            Authenticator::Static(account) => {
                Rc::new(StaticAuthClient::allow(handle.clone(), account))
            }
            Authenticator::File {
                creds,
                access_key,
                secret_key,
            } => Rc::new(creds.client(
                handle.clone(),
                Some(access_key.clone()),
                Some(secret_key.clone()),
            )),
        }
    }

    fn account(&self) -> Option<String> {
        match self {
            Authenticator::Static(account) => Some(account.clone()),
            Authenticator::File { .. } => None,
        }
    }
}

fn run_request(
    event_loop: &mut EventLoop,
    request: &Rc<RecordingRequest>,
    label: &str,
    build: impl FnOnce(&Inbound) -> Action,
    auth: Rc<dyn AuthClient>,
) {
    let inbound = Inbound::new(request.clone()).with_auth(auth);
    let action = build(&inbound);
    action.start();
    event_loop.run_until_idle();

    match request.last_response() {
        Some(response) => println!(
            "{:<16} {} -> {} {}",
            label,
            request.request_id(),
            response.status,
            response
                .error_code
                .map(|code| code.to_string())
                .or(response.body)
                .unwrap_or_default()
        ),
        None => println!("{:<16} {} -> no response", label, request.request_id()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_setup::init_tracing_from_env("info");

    let args = Args::parse();

    let cfg = match &args.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };

    let shutdown = ShutdownSignal::new(cfg.shutdown.grace_period());
    let _ctrl_c = shutdown.listen_for_ctrl_c();

    let auth_file = args.auth_file.clone().or_else(|| cfg.auth_file.clone());
    let authenticator = match auth_file {
        Some(path) => Authenticator::File {
            creds: FileCredentials::load(path).await?,
            access_key: args.access_key.clone(),
            secret_key: args.secret_key.clone(),
        },
        None => Authenticator::Static(args.account.clone()),
    };

    let mut event_loop = EventLoop::new();
    let handle = event_loop.handle();
    let kvs = Rc::new(InMemoryKvs::new(handle.clone()));
    let ctx = OperationContext::new(kvs, shutdown.clone(), cfg.clone());

    tracing::info!(
        bucket = %args.bucket,
        check_shutdown_signal = cfg.action.check_shutdown_signal,
        client_read_timeout_secs = cfg.action.client_read_timeout_secs,
        "starting walkthrough"
    );

    let new_request = || {
        let id = format!("{}{}", cfg.request_id_prefix, uuid::Uuid::new_v4());
        let request = RecordingRequest::new(id).with_access_key(args.access_key.clone());
        Rc::new(match authenticator.account() {
            Some(account) => request.with_account(account),
            None => request,
        })
    };

    // the management API needs the account id up front
    let account = match &authenticator {
        Authenticator::Static(account) => account.clone(),
        Authenticator::File { .. } => args.account.clone(),
    };
    let bucket = args.bucket.as_str();

    let request = new_request();
    run_request(
        &mut event_loop,
        &request,
        "register_account",
        |inbound| ops::register_account(&ctx, inbound, &account),
        authenticator.client(&handle),
    );

    let request = new_request();
    run_request(
        &mut event_loop,
        &request,
        "create_bucket",
        |inbound| ops::create_bucket(&ctx, inbound, bucket, None),
        authenticator.client(&handle),
    );

    let request = new_request();
    run_request(
        &mut event_loop,
        &request,
        "head_bucket",
        |inbound| ops::head_bucket(&ctx, inbound, bucket),
        authenticator.client(&handle),
    );

    let request = new_request();
    run_request(
        &mut event_loop,
        &request,
        "put_object",
        |inbound| {
            ops::put_object_metadata(
                &ctx,
                inbound,
                bucket,
                "hello.txt",
                Bytes::from_static(b"hello world"),
                "text/plain",
            )
        },
        authenticator.client(&handle),
    );

    let request = new_request();
    run_request(
        &mut event_loop,
        &request,
        "delete_bucket",
        |inbound| ops::delete_bucket(&ctx, inbound, bucket),
        authenticator.client(&handle),
    );

    let request = new_request();
    run_request(
        &mut event_loop,
        &request,
        "delete_object",
        |inbound| ops::delete_object(&ctx, inbound, bucket, "hello.txt"),
        authenticator.client(&handle),
    );

    let request = new_request();
    run_request(
        &mut event_loop,
        &request,
        "delete_bucket",
        |inbound| ops::delete_bucket(&ctx, inbound, bucket),
        authenticator.client(&handle),
    );

    if args.metrics {
        print!("{}", metrics::gather_metrics_text());
    }

    if shutdown.is_shutting_down() {
        tracing::info!("waiting for grace period before exit");
        shutdown.wait_grace_period().await;
    }

    Ok(())
}
