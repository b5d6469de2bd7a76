//! Module for running the HTTP server.

use std::net::SocketAddr;

use super::*;

/// Options for [`Commands::Serve`].
#[derive(Args, Clone)]
pub struct ServeOptions {
  /// Address to listen on
  #[arg(long, default_value = "0.0.0.0")]
  pub host: String,
  /// Port to listen on
  #[arg(long, default_value_t = 5001)]
  pub port: u16,
}

/// Function for the [`Commands::Serve`] in the CLI.
///
/// Serves until interrupted with Ctrl-C. Background runs still in progress at that point are
/// abandoned; their artifacts are either complete or absent.
pub async fn serve(config: Config, options: ServeOptions) -> Result<()> {
  let address: SocketAddr = format!("{}:{}", options.host, options.port).parse()?;
  let mill = Arc::new(Mill::from_config(config).await?);
  info!("Artifacts under {:?}, public URL {}", mill.store.root(), mill.config.public_url);

  let listener = tokio::net::TcpListener::bind(address).await?;
  println!(
    "{} Serving papermill on {}",
    style(SUCCESS_PREFIX).green(),
    style(format!("http://{address}")).blue().underlined()
  );
  info!("Listening on {address}");

  axum::serve(listener, server::router(server::AppState::new(mill)))
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  info!("Server stopped");
  Ok(())
}

/// Resolves once Ctrl-C is received, or never if the signal cannot be installed.
async fn shutdown_signal() {
  match tokio::signal::ctrl_c().await {
    Ok(()) => info!("Received Ctrl-C, shutting down"),
    Err(e) => {
      error!("Failed to listen for Ctrl-C: {e}");
      std::future::pending::<()>().await
    },
  }
}
