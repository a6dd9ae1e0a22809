//! Remote access to an [`AttributeCache`].
//!
//! A worker asks the master for attributes it does not have with
//! [`AttrClient::get_attr`], and the master pushes deltas to workers through
//! the same client, which doubles as the network [`FanoutClient`].

use std::io::{Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{AttributeCache, FanoutClient, FileAttr, FileSet, ProcessError};
use crate::error::WireError;
use crate::wire::{read_frame, write_frame};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrRequest {
    GetAttr {
        name: String,
        /// Who is asking, for the remote log.
        origin: String,
    },
    Update {
        files: Vec<FileAttr>,
        /// Sender's id. Nodes use their serving address, so the receiver
        /// can fetch content it lacks from there.
        origin: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrResponse {
    Attrs(Vec<FileAttr>),
    Updated,
    Error(String),
}

/// Applies a received update on behalf of [`AttrServer`]. Called with the
/// sender's origin.
pub type UpdateHandler = Box<dyn Fn(&str, &FileSet) -> Result<(), ProcessError> + Send + Sync>;

pub struct AttrServer {
    cache: Arc<AttributeCache>,
    on_update: Option<UpdateHandler>,
}

impl AttrServer {
    /// Updates go straight into `cache`.
    pub fn new(cache: Arc<AttributeCache>) -> Self {
        Self {
            cache,
            on_update: None,
        }
    }

    /// Updates are passed to `handler` instead of being applied directly.
    pub fn with_update_handler(cache: Arc<AttributeCache>, handler: UpdateHandler) -> Self {
        Self {
            cache,
            on_update: Some(handler),
        }
    }

    pub fn cache(&self) -> &Arc<AttributeCache> {
        &self.cache
    }

    pub fn handle(&self, req: AttrRequest) -> AttrResponse {
        match req {
            AttrRequest::GetAttr { name, origin } => {
                if name.starts_with('/') {
                    return AttrResponse::Error(format!("name {:?} starts with /", name));
                }
                tracing::debug!(origin = %origin, name = %name, "GetAttr");
                let attr = self.cache.get_dir(&name);
                if attr.hash().is_some() {
                    tracing::trace!(attr = %attr, "GetAttr answer");
                }
                AttrResponse::Attrs(vec![attr])
            }
            AttrRequest::Update { files, origin } => {
                tracing::debug!(origin = %origin, entries = files.len(), "applying remote update");
                match &self.on_update {
                    Some(handler) => match handler(&origin, &FileSet::new(files)) {
                        Ok(()) => AttrResponse::Updated,
                        Err(e) => {
                            tracing::warn!(origin = %origin, error = %e, "remote update failed");
                            AttrResponse::Error(e.to_string())
                        }
                    },
                    None => {
                        self.cache.update(&files);
                        AttrResponse::Updated
                    }
                }
            }
        }
    }

    /// Answer requests on `stream` until the peer hangs up.
    pub fn serve_conn<S: Read + Write>(&self, stream: &mut S) -> Result<(), WireError> {
        loop {
            let req = match read_frame(stream) {
                Ok(req) => req,
                Err(WireError::Closed) => return Ok(()),
                Err(e) => return Err(e),
            };
            write_frame(stream, &self.handle(req))?;
        }
    }
}

/// Client end of an attribute connection.
pub struct AttrClient<S> {
    stream: Mutex<S>,
    id: String,
}

impl<S: Read + Write> AttrClient<S> {
    /// `id` names this end in the remote's logs and in fan-out queues, and
    /// is sent as the origin of updates.
    pub fn new(stream: S, id: impl Into<String>) -> Self {
        Self {
            stream: Mutex::new(stream),
            id: id.into(),
        }
    }

    fn call(&self, req: &AttrRequest) -> Result<AttrResponse, WireError> {
        let mut stream = self.stream.lock();
        write_frame(&mut *stream, req)?;
        match read_frame(&mut *stream)? {
            AttrResponse::Error(msg) => Err(WireError::Remote(msg)),
            resp => Ok(resp),
        }
    }

    /// Attributes of `name` as the remote cache sees them.
    pub fn get_attr(&self, name: &str) -> Result<FileAttr, WireError> {
        let req = AttrRequest::GetAttr {
            name: name.to_string(),
            origin: self.id.clone(),
        };
        match self.call(&req)? {
            AttrResponse::Attrs(attrs) => Ok(attrs
                .into_iter()
                .find(|a| a.path == name)
                .unwrap_or_else(|| FileAttr::deletion(name))),
            other => Err(WireError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    pub fn update(&self, files: &[FileAttr]) -> Result<(), WireError> {
        let req = AttrRequest::Update {
            files: files.to_vec(),
            origin: self.id.clone(),
        };
        match self.call(&req)? {
            AttrResponse::Updated => Ok(()),
            other => Err(WireError::UnexpectedResponse(format!("{:?}", other))),
        }
    }
}

impl<S: Read + Write + Send> FanoutClient for AttrClient<S> {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn send(&self, batch: &[FileAttr]) -> Result<(), WireError> {
        self.update(batch)
    }
}
