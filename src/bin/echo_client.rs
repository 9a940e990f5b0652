use color_eyre::eyre::{Result, WrapErr};
use echorpc::cli::ClientArgs;
use echorpc::{Channel, Controller, EchoRequest, EchoServiceStub, logging, shutdown};
use structopt::StructOpt;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    logging::init_logging();

    let args = ClientArgs::from_args();
    let options = args.channel_options().wrap_err("Invalid channel options")?;
    let channel = Channel::init(&args.server, &args.load_balancer, options)
        .await
        .wrap_err("Fail to initialize channel")?;
    let stub = EchoServiceStub::new(&channel);

    let quit = shutdown::install_quit_handler();
    let mut log_id: u64 = 0;
    while !quit.is_cancelled() {
        let request = EchoRequest::new("hello world");
        let mut cntl = Controller::new();
        cntl.set_log_id(log_id);
        log_id += 1;
        cntl.set_request_attachment(args.attachment.clone());

        match stub.echo(&mut cntl, &request).await {
            Ok(response) => info!(
                remote = %cntl.remote_side().map(ToString::to_string).unwrap_or_default(),
                local = %cntl.local_side().map(ToString::to_string).unwrap_or_default(),
                message = %response.message,
                attached = %String::from_utf8_lossy(cntl.response_attachment()),
                latency_us = cntl.latency_us(),
                "Received response"
            ),
            Err(_) => warn!(error = %cntl.error_text(), "Echo failed"),
        }

        tokio::select! {
            _ = quit.cancelled() => {}
            _ = tokio::time::sleep(args.interval()) => {}
        }
    }

    info!("EchoClient is going to quit");
    Ok(())
}
