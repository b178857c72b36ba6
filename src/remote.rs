//! A remote repository reachable over a stateless transport.

use std::fmt;
use std::io;

use crate::advertisement::Advertisement;
use crate::fetch::{FetchStream, V1_EXTRA_PARAMS};
use crate::interrupt::CancellationFlag;
use crate::push::PushStream;
use crate::transport::Transport;
use crate::{Error, Result};

/// Credentials the transport was built with, retained for callers that need
/// to re-derive or display them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    /// The user name.
    pub username: String,
    /// The password or token.
    pub password: String,
}

/// A remote repository bound to a URL and a transport.
pub struct Remote {
    url: String,
    auth: Option<Auth>,
    transport: Box<dyn Transport>,
}

impl Remote {
    /// Bind `url` to a transport implementation. The transport is expected to
    /// already incorporate `auth`; the remote keeps both for inspection.
    pub fn new(url: impl Into<String>, auth: Option<Auth>, transport: Box<dyn Transport>) -> Self {
        Remote {
            url: url.into(),
            auth,
            transport,
        }
    }

    /// The remote's URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The credentials given at construction.
    pub fn auth(&self) -> Option<&Auth> {
        self.auth.as_ref()
    }

    /// Open a fetch stream. This immediately performs one `upload-pack`
    /// round trip to obtain the ref advertisement.
    pub fn start_fetch(&self, cancel: &CancellationFlag) -> Result<FetchStream<'_>> {
        cancel.check()?;
        let body = self
            .transport
            .upload_pack(cancel, V1_EXTRA_PARAMS, &mut io::empty())
            .map_err(|source| Error::Transport { source })?;
        let advertisement = Advertisement::read_first(body)?;
        Ok(FetchStream::new(&*self.transport, advertisement))
    }

    /// Open a push stream. This immediately performs one `receive-pack`
    /// round trip to obtain the ref advertisement.
    pub fn start_push(&self, cancel: &CancellationFlag) -> Result<PushStream<'_>> {
        cancel.check()?;
        let body = self
            .transport
            .receive_pack(cancel, &mut io::empty())
            .map_err(|source| Error::Transport { source })?;
        let advertisement = Advertisement::read_first(body)?;
        Ok(PushStream::new(&*self.transport, advertisement))
    }
}

impl fmt::Debug for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remote")
            .field("url", &self.url)
            .field("auth", &self.auth.as_ref().map(|auth| auth.username.as_str()))
            .finish_non_exhaustive()
    }
}
