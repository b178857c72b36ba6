//! A client for Git's pack protocol, version 1, over a stateless transport.
//!
//! This crate implements the client half of the smart-protocol conversation:
//! it parses the ref advertisement, drives the want/have negotiation for
//! fetches, demultiplexes the side-band pack stream, and runs the
//! command/report dialogue for pushes. It also carries the object codec
//! needed to construct and verify the commits being transferred.
//!
//! Transport selection (local process, SSH subprocess, smart HTTP) is out of
//! scope; a transport is anything implementing [`transport::Transport`],
//! one stateless round trip per service call. The packfile container itself
//! is likewise opaque here: a fetch yields the raw pack byte stream, a push
//! accepts one.
//!
//! # Example
//!
//! ```no_run
//! use gix_pack_client::{CancellationFlag, FetchRequest, Remote};
//! # fn transport() -> Box<dyn gix_pack_client::transport::Transport> { unimplemented!() }
//!
//! let remote = Remote::new("https://example.com/repo.git", None, transport());
//! let cancel = CancellationFlag::new();
//! let mut stream = remote.start_fetch(&cancel)?;
//! let refs = stream.list_refs(&cancel, &["refs/heads/"])?;
//! let response = stream.negotiate(
//!     &cancel,
//!     FetchRequest::wants(refs.iter().map(|r| r.id).collect()),
//! )?;
//! if let Some(packfile) = response.packfile {
//!     // stream the pack, then release the body
//!     packfile.close()?;
//! }
//! stream.close()?;
//! # Ok::<(), gix_pack_client::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod capabilities;
pub mod object;
pub mod pktline;
pub mod refs;
pub mod transport;

mod advertisement;
mod error;
mod fetch;
mod interrupt;
mod push;
mod remote;
mod sideband;

pub use error::{Error, Kind, Result};
pub use fetch::{FetchRequest, FetchResponse, FetchStream};
pub use interrupt::CancellationFlag;
pub use object::ObjectId;
pub use push::{PushCommand, PushStream};
pub use refs::{Ref, RefName};
pub use remote::{Auth, Remote};
pub use sideband::Packfile;
