use clap::Args;

use common::attr::AttrClient;
use common::error::WireError;
use hive_daemon::{connect, Hello};

#[derive(Args, Debug, Clone)]
pub struct Stat {
    /// Node to ask, host:port
    #[arg(long)]
    pub peer: String,

    /// Path relative to the node's source tree; empty for the root
    #[arg(default_value = "")]
    pub path: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StatError {
    #[error("could not reach {peer}: {source}")]
    Connect { peer: String, source: WireError },

    #[error("lookup failed: {0}")]
    Wire(#[from] WireError),

    #[error("failed to encode attributes: {0}")]
    Json(#[from] serde_json::Error),
}

impl crate::cli::op::Op for Stat {
    type Error = StatError;
    /// The remote attributes as pretty-printed JSON.
    type Output = String;

    fn execute(&self, _ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let stream =
            connect(self.peer.as_str(), Hello::Attr).map_err(|source| StatError::Connect {
                peer: self.peer.clone(),
                source,
            })?;
        let client = AttrClient::new(stream, "hive-cli");
        let attr = client.get_attr(&self.path)?;
        Ok(serde_json::to_string_pretty(&attr)?)
    }
}
