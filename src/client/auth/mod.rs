//! Contains the types needed to specify the auth configuration for a
//! [`Client`](crate::Client).

mod plain;
mod sasl;
mod scram;
mod x509;

use std::{fmt, str::FromStr};

use rand::Rng;
use typed_builder::TypedBuilder;

use self::scram::ScramVersion;
use crate::{
    bson::Document,
    cmap::{Connection, StreamDescription},
    error::{Error, ErrorKind, Result},
};

const SCRAM_SHA_1_STR: &str = "SCRAM-SHA-1";
const SCRAM_SHA_256_STR: &str = "SCRAM-SHA-256";
const MONGODB_X509_STR: &str = "MONGODB-X509";
const PLAIN_STR: &str = "PLAIN";

/// The authentication mechanisms supported by MongoDB.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum AuthMechanism {
    /// The SCRAM-SHA-1 mechanism as defined in [RFC 5802](http://tools.ietf.org/html/rfc5802).
    ///
    /// See the [MongoDB documentation](https://www.mongodb.com/docs/manual/core/security-scram/) for more information.
    ScramSha1,

    /// The SCRAM-SHA-256 mechanism which extends [RFC 5802](http://tools.ietf.org/html/rfc5802)
    /// and is formally defined in [RFC 7677](https://tools.ietf.org/html/rfc7677).
    ///
    /// See the [MongoDB documentation](https://www.mongodb.com/docs/manual/core/security-scram/) for more information.
    ScramSha256,

    /// The MONGODB-X509 mechanism based on the usage of X.509 certificates to
    /// validate a client where the distinguished subject name of the client
    /// certificate acts as the username.
    ///
    /// See the [MongoDB documentation](https://www.mongodb.com/docs/manual/core/security-x.509/) for more information.
    MongoDbX509,

    /// The SASL PLAIN mechanism, as defined in [RFC 4616](https://tools.ietf.org/html/rfc4616),
    /// is used in MongoDB to perform LDAP authentication. It cannot be used
    /// for any other type of authentication. Since the credentials are stored
    /// outside of MongoDB, the `$external` database must be used for
    /// authentication.
    ///
    /// See the [MongoDB documentation](https://www.mongodb.com/docs/manual/core/security-ldap/#ldap-proxy-authentication)
    /// for more information on LDAP authentication.
    Plain,
}

impl AuthMechanism {
    /// Selects the strongest SCRAM variant advertised by the server in the
    /// mechanism negotiation reply, falling back to SCRAM-SHA-1.
    pub(crate) fn from_stream_description(description: &StreamDescription) -> AuthMechanism {
        let scram_sha_256_found = description
            .sasl_supported_mechs
            .as_ref()
            .map(|ms| ms.iter().any(|m| m == SCRAM_SHA_256_STR))
            .unwrap_or(false);

        if scram_sha_256_found {
            AuthMechanism::ScramSha256
        } else {
            AuthMechanism::ScramSha1
        }
    }

    /// Determines if the provided credentials have the required information
    /// to perform authentication.
    pub fn validate_credential(&self, credential: &Credential) -> Result<()> {
        match self {
            AuthMechanism::ScramSha1 | AuthMechanism::ScramSha256 => {
                if credential.username.is_none() {
                    return Err(ErrorKind::InvalidArgument {
                        message: "No username provided for SCRAM authentication".to_string(),
                    }
                    .into());
                }
                Ok(())
            }
            AuthMechanism::MongoDbX509 => {
                if credential.password.is_some() {
                    return Err(ErrorKind::InvalidArgument {
                        message: "A password cannot be specified with MONGODB-X509".to_string(),
                    }
                    .into());
                }

                if credential.source.as_deref().unwrap_or("$external") != "$external" {
                    return Err(ErrorKind::InvalidArgument {
                        message: "only $external may be specified as an auth source for \
                                  MONGODB-X509"
                            .to_string(),
                    }
                    .into());
                }

                Ok(())
            }
            AuthMechanism::Plain => {
                if credential.username.as_deref().unwrap_or("").is_empty() {
                    return Err(ErrorKind::InvalidArgument {
                        message: "Username for PLAIN authentication must be non-empty".to_string(),
                    }
                    .into());
                }

                if credential.password.is_none() {
                    return Err(ErrorKind::InvalidArgument {
                        message: "No password provided for PLAIN authentication".to_string(),
                    }
                    .into());
                }

                Ok(())
            }
        }
    }

    /// Returns this `AuthMechanism` as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMechanism::ScramSha1 => SCRAM_SHA_1_STR,
            AuthMechanism::ScramSha256 => SCRAM_SHA_256_STR,
            AuthMechanism::MongoDbX509 => MONGODB_X509_STR,
            AuthMechanism::Plain => PLAIN_STR,
        }
    }

    /// Get the default authSource for a given mechanism depending on the
    /// database provided in the connection string.
    pub(crate) fn default_source<'a>(&'a self, uri_db: Option<&'a str>) -> &'a str {
        match self {
            AuthMechanism::ScramSha1 | AuthMechanism::ScramSha256 => uri_db.unwrap_or("admin"),
            AuthMechanism::MongoDbX509 | AuthMechanism::Plain => "$external",
        }
    }

    /// Constructs the first message to be sent to the server as part of the
    /// authentication handshake, which can be used for speculative
    /// authentication.
    pub(crate) fn build_speculative_client_first(
        &self,
        credential: &Credential,
    ) -> Result<Option<ClientFirst>> {
        match self {
            Self::ScramSha1 => {
                let client_first = ScramVersion::Sha1.build_client_first(credential)?;
                Ok(Some(ClientFirst::Scram(ScramVersion::Sha1, client_first)))
            }
            Self::ScramSha256 => {
                let client_first = ScramVersion::Sha256.build_client_first(credential)?;
                Ok(Some(ClientFirst::Scram(ScramVersion::Sha256, client_first)))
            }
            Self::MongoDbX509 => Ok(Some(ClientFirst::X509(x509::build_client_first(
                credential,
            )))),
            Self::Plain => Ok(None),
        }
    }

    /// Performs the authentication handshake for this mechanism on the given
    /// connection. If the server replied to a speculative attempt made
    /// during the hello, the conversation is resumed from there.
    pub(crate) async fn authenticate_stream(
        &self,
        stream: &mut Connection,
        credential: &Credential,
        speculative: Option<(ClientFirst, Option<Document>)>,
    ) -> Result<()> {
        self.validate_credential(credential)?;

        if let Some((client_first, Some(server_first))) = speculative {
            match (self, client_first) {
                (Self::ScramSha1, ClientFirst::Scram(ScramVersion::Sha1, client_first)) => {
                    return ScramVersion::Sha1
                        .authenticate_stream(stream, credential, Some((client_first, server_first)))
                        .await;
                }
                (Self::ScramSha256, ClientFirst::Scram(ScramVersion::Sha256, client_first)) => {
                    return ScramVersion::Sha256
                        .authenticate_stream(stream, credential, Some((client_first, server_first)))
                        .await;
                }
                // the server accepting the speculative authenticate command
                // completes X.509 authentication
                (Self::MongoDbX509, ClientFirst::X509(..)) => return Ok(()),
                _ => {}
            }
        }

        match self {
            AuthMechanism::ScramSha1 => {
                ScramVersion::Sha1
                    .authenticate_stream(stream, credential, None)
                    .await
            }
            AuthMechanism::ScramSha256 => {
                ScramVersion::Sha256
                    .authenticate_stream(stream, credential, None)
                    .await
            }
            AuthMechanism::MongoDbX509 => x509::authenticate_stream(stream, credential).await,
            AuthMechanism::Plain => plain::authenticate_stream(stream, credential).await,
        }
    }
}

impl FromStr for AuthMechanism {
    type Err = Error;

    fn from_str(str: &str) -> Result<Self> {
        match str {
            SCRAM_SHA_1_STR => Ok(AuthMechanism::ScramSha1),
            SCRAM_SHA_256_STR => Ok(AuthMechanism::ScramSha256),
            MONGODB_X509_STR => Ok(AuthMechanism::MongoDbX509),
            PLAIN_STR => Ok(AuthMechanism::Plain),
            _ => Err(ErrorKind::InvalidArgument {
                message: format!("invalid mechanism string: {}", str),
            }
            .into()),
        }
    }
}

/// The first message sent as part of speculative authentication, carried in
/// the handshake hello.
#[derive(Clone, Debug)]
pub(crate) enum ClientFirst {
    Scram(ScramVersion, scram::ClientFirst),
    X509(Document),
}

impl ClientFirst {
    pub(crate) fn to_document(&self) -> Document {
        match self {
            Self::Scram(version, client_first) => {
                let mut doc = client_first.to_command(version).body;
                // speculative saslStart must name the db it runs against
                doc.insert("db", client_first.source.clone());
                doc
            }
            Self::X509(doc) => doc.clone(),
        }
    }
}

/// A struct containing authentication information.
///
/// Some fields (mechanism and source) may be omitted and will either be
/// negotiated or assigned a default value, depending on the values of other
/// fields in the credential.
#[derive(Clone, Default, TypedBuilder, PartialEq)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[non_exhaustive]
pub struct Credential {
    /// The username to authenticate with. This applies to all mechanisms but
    /// may be omitted when authenticating via MONGODB-X509.
    pub username: Option<String>,

    /// The database used to authenticate. This applies to all mechanisms and
    /// defaults to "admin" for SCRAM and "$external" for MONGODB-X509 and
    /// PLAIN.
    pub source: Option<String>,

    /// The password to authenticate with. This does not apply to
    /// MONGODB-X509.
    pub password: Option<String>,

    /// Which authentication mechanism to use. If not provided, one will be
    /// negotiated with the server.
    pub mechanism: Option<AuthMechanism>,

    /// Additional properties for the given mechanism.
    pub mechanism_properties: Option<Document>,
}

impl Credential {
    /// The database this credential authenticates against, accounting for
    /// mechanism defaults.
    pub(crate) fn resolved_source(&self) -> &str {
        self.source.as_deref().unwrap_or_else(|| {
            self.mechanism
                .as_ref()
                .map(|mechanism| mechanism.default_source(None))
                .unwrap_or("admin")
        })
    }

    /// If the mechanism will be negotiated, adds the `saslSupportedMechs`
    /// request to the handshake hello.
    pub(crate) fn append_needed_mechanism_negotiation(&self, body: &mut Document) {
        if let (Some(username), None) = (self.username.as_ref(), self.mechanism.as_ref()) {
            body.insert(
                "saslSupportedMechs",
                format!("{}.{}", self.resolved_source(), username),
            );
        }
    }

    /// Attempts to construct the first round of the conversation for
    /// speculative authentication in the handshake. Mechanism negotiation
    /// precludes speculation, since the mechanism is not yet known.
    pub(crate) fn build_speculative_client_first(&self) -> Result<Option<ClientFirst>> {
        match self.mechanism {
            Some(ref mechanism) => mechanism.build_speculative_client_first(self),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // the password must never appear in diagnostic output
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("source", &self.source)
            .field("password", &self.password.as_ref().map(|_| "..."))
            .field("mechanism", &self.mechanism)
            .field("mechanism_properties", &self.mechanism_properties)
            .finish()
    }
}

/// Generates a new base64-encoded 24-byte client nonce.
pub(crate) fn generate_nonce() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill(&mut bytes[..]);
    crate::bson::base64_encode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bson::doc;

    #[test]
    fn debug_elides_password() {
        let credential = Credential::builder()
            .username("user")
            .password("hunter2")
            .build();
        let output = format!("{:?}", credential);
        assert!(!output.contains("hunter2"));
        assert!(output.contains("user"));
    }

    #[test]
    fn negotiation_requested_only_without_mechanism() {
        let mut body = doc! { "hello": 1 };
        Credential::builder()
            .username("jane")
            .password("pw")
            .build()
            .append_needed_mechanism_negotiation(&mut body);
        assert_eq!(body.get_str("saslSupportedMechs"), Ok("admin.jane"));

        let mut body = doc! { "hello": 1 };
        Credential::builder()
            .username("jane")
            .password("pw")
            .mechanism(AuthMechanism::ScramSha256)
            .build()
            .append_needed_mechanism_negotiation(&mut body);
        assert!(!body.contains_key("saslSupportedMechs"));
    }

    #[test]
    fn default_sources() {
        assert_eq!(AuthMechanism::ScramSha1.default_source(Some("app")), "app");
        assert_eq!(AuthMechanism::ScramSha1.default_source(None), "admin");
        assert_eq!(AuthMechanism::MongoDbX509.default_source(None), "$external");
        assert_eq!(AuthMechanism::Plain.default_source(Some("app")), "$external");
    }
}
