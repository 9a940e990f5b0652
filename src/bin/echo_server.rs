use color_eyre::eyre::{Result, WrapErr};
use echorpc::cli::ServerArgs;
use echorpc::echo::EchoServiceHandler;
use echorpc::{EchoServiceImpl, Server, logging, shutdown};
use structopt::StructOpt;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    logging::init_logging();

    let args = ServerArgs::from_args();

    let mut server = Server::new();
    server
        .add_service(EchoServiceHandler::new(EchoServiceImpl::new(
            args.echo_attachment(),
        )))
        .wrap_err("Failed to add service")?;

    let address = args
        .listen_address()
        .wrap_err_with(|| format!("Invalid listen address '{}'", args.listen_addr))?;
    server
        .start(&address, args.server_options())
        .await
        .wrap_err("Failed to start EchoServer")?;

    if let Some(bound) = server.listen_address() {
        info!(address = %bound, echo_attachment = args.echo_attachment(), "EchoServer is serving");
    }

    let quit = shutdown::install_quit_handler();
    server
        .run_until_asked_to_quit(&quit)
        .await
        .wrap_err("Failed to stop EchoServer")?;
    Ok(())
}
