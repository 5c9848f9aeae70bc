/*!
 * Flowkernel - Echo Demo
 *
 * Starts an echo server over raw length-prefixed frames, sends it one
 * request through a client task, then keeps serving until Ctrl+C.
 */

use miette::{IntoDiagnostic, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use flowkernel::protocol::RawMessage;
use flowkernel::task::{ClientTask, ServerTask};
use flowkernel::{
    init_tracing, series_completion, GlobalSettings, Runtime, Series, Server, ServerParams, Task, TaskState,
    Workflow,
};

type EchoClient = ClientTask<RawMessage, RawMessage>;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings = match std::env::var("FLOWKERNEL_CONFIG") {
        Ok(path) => GlobalSettings::from_json_file(&path)?,
        Err(_) => GlobalSettings::from_env()?,
    };
    let runtime = Runtime::new(settings)?;

    let addr: SocketAddr = std::env::var("FLOWKERNEL_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:9090".to_string())
        .parse()
        .into_diagnostic()?;

    let server = Server::new(
        &runtime,
        ServerParams::default(),
        Arc::new(|task: &mut ServerTask<RawMessage, RawMessage>, _: &Series| {
            let body = bytes::Bytes::copy_from_slice(task.req().body());
            task.resp().set_body(body);
        }),
    );
    server.start(addr)?;
    let local = server.listen_addr().unwrap_or(addr);
    info!(addr = %local, "Echo server listening");

    let client = runtime.create_client_task(
        local,
        RawMessage::new("hello from flowkernel"),
        2,
        Some(Box::new(|task: &mut EchoClient, _: &Series| {
            if task.state() == TaskState::Success {
                info!(reply = %String::from_utf8_lossy(task.resp().body()), "Echo reply");
            } else {
                warn!(error = %task.error_string(), "Echo request failed");
            }
        })),
    );
    let series = Workflow::create_series_work(client, None);
    let done = series_completion(&series);
    series.start();
    done.await;

    info!("Press Ctrl+C to exit");
    tokio::signal::ctrl_c().await.into_diagnostic()?;

    info!("Shutting down");
    server.stop();
    runtime.shutdown();
    Ok(())
}
