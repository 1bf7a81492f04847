// ABOUTME: Serve command - runs the HTTP API until SIGINT/SIGTERM
// ABOUTME: Optionally connects both sides at startup from the configured connection strings

use anyhow::Result;
use clap::Args;

use super::GlobalOptions;
use crate::server::{self, AppState};
use crate::sync::Side;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind (defaults to server.host)
    #[arg(long)]
    pub host: Option<String>,
    /// Port to listen on (defaults to server.port)
    #[arg(long)]
    pub port: Option<u16>,
    /// Connect to the configured source and target before accepting requests
    #[arg(long = "connect-on-start")]
    pub connect_on_start: bool,
}

pub async fn serve(args: ServeArgs, options: &GlobalOptions) -> Result<()> {
    let mut settings = options.config.server.clone();
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }

    let state = AppState::new(options.config.sync.clone());
    if args.connect_on_start {
        for side in [Side::Source, Side::Target] {
            let client = options.connect(side).await?;
            state.set_connection(side, client).await;
        }
    }

    server::serve(&settings, state).await
}
