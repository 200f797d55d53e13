#![doc = include_str!("../README.md")]
#![warn(clippy::cast_possible_truncation)]
#![warn(clippy::cast_possible_wrap)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

#[macro_use]
pub mod bson;

pub mod change_stream;
mod client;
mod cmap;
mod coll;
mod compression;
mod concern;
mod cursor;
mod db;
pub mod error;
pub mod event;
mod hello;
mod operation;
pub mod options;
pub mod results;
pub(crate) mod runtime;
mod sdam;
mod selection_criteria;
mod serde_util;
mod srv;

pub use crate::{
    client::{
        session::{ClientSession, ClusterTime},
        Client,
    },
    coll::{Collection, Namespace},
    cursor::{Cursor, SessionCursor},
    db::Database,
};

pub use change_stream::ChangeStream;
pub use cmap::ConnectionInfo;
pub use sdam::{public::*, ServerType, TopologyType};

/// A boxed future, as returned by the callback of
/// [`ClientSession::with_transaction`].
pub type BoxFuture<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
