//! Contains all of the types needed to specify options to the methods in
//! this crate.

pub use crate::{
    client::{
        auth::{AuthMechanism, Credential},
        options::{
            ClientOptions,
            ServerAddress,
            SessionOptions,
            Tls,
            TlsOptions,
            TransactionOptions,
        },
    },
    coll::options::*,
    compression::Compressor,
    concern::{Acknowledgment, ReadConcern, ReadConcernLevel, WriteConcern},
    db::DatabaseOptions,
    selection_criteria::{ReadPreference, ReadPreferenceOptions, SelectionCriteria, TagSet},
};

pub(crate) use crate::client::options::SrvParseState;
