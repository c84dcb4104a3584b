use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use pepperoni::{Args, ReqwestUploadClient, real_hardware_client, run};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let shutdown = CancellationToken::new();

    let run_result = async {
        let (command, config) = args.into_command_and_config()?;
        let upload_client = ReqwestUploadClient::new()?;

        let task = tokio::spawn(run(
            command,
            config,
            real_hardware_client(),
            Box::new(upload_client),
            shutdown.clone(),
        ));

        let ctrl_c_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ctrl_c_shutdown.cancel();
            }
        });

        task.await?
    }
    .await;

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}
