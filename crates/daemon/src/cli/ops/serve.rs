use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;

use hive_daemon::{Service, ServiceSetupError};

#[derive(Args, Debug, Clone)]
pub struct Serve {
    /// Address to listen on (overrides [server].listen_addr)
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Source tree to mirror (overrides [attr].root)
    #[arg(long)]
    pub root: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("setup failed: {0}")]
    Setup(#[from] ServiceSetupError),

    #[error("server failed: {0}")]
    Io(#[from] std::io::Error),
}

impl crate::cli::op::Op for Serve {
    type Error = ServeError;
    type Output = String;

    fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = ctx.config.clone();
        if let Some(root) = &self.root {
            config.attr.root = Some(root.clone());
        }
        let addr = self.listen.unwrap_or(config.server.listen_addr);

        let service = Arc::new(Service::from_config(&config)?);
        let listener = Service::bind(addr)?;
        service.serve(listener)?;
        Ok("server stopped".to_string())
    }
}
