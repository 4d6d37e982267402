//! API server command: `codesage serve`.

use anyhow::Result;

use codesage::analysis::server::{ServerConfig, start_server};
use codesage::config::ServiceConfig;

pub async fn cmd_serve(
    mut config: ServiceConfig,
    port: Option<u16>,
    analyzer_url: Option<String>,
    dev: bool,
) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(url) = analyzer_url {
        config.analyzer.url = url;
    }
    config.check()?;

    let mut server = ServerConfig::from_service(&config);
    server.dev_mode = dev;
    start_server(server).await
}
