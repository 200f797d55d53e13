use std::sync::LazyLock;

use crate::{
    bson::{doc, Bson, Document},
    client::auth::{AuthMechanism, ClientFirst, Credential},
    cmap::{Command, Connection, StreamDescription},
    compression::Compressor,
    error::Result,
    hello::{hello_command, run_hello, HelloReply},
};

#[derive(Clone, Debug, PartialEq)]
struct ClientMetadata {
    application: Option<AppMetadata>,
    driver: DriverMetadata,
    os: OsMetadata,
    platform: String,
}

#[derive(Clone, Debug, PartialEq)]
struct AppMetadata {
    name: String,
}

#[derive(Clone, Debug, PartialEq)]
struct DriverMetadata {
    name: String,
    version: String,
}

#[derive(Clone, Debug, PartialEq)]
struct OsMetadata {
    os_type: String,
    name: Option<String>,
    architecture: String,
}

/// Contains the basic handshake information that can be statically
/// determined. This document (potentially with additional fields added) is
/// cloned and put in the `client` field of the `hello` command.
static BASE_CLIENT_METADATA: LazyLock<ClientMetadata> = LazyLock::new(|| ClientMetadata {
    application: None,
    driver: DriverMetadata {
        name: "mongolite".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    },
    os: OsMetadata {
        os_type: std::env::consts::OS.into(),
        name: None,
        architecture: std::env::consts::ARCH.into(),
    },
    platform: format!(
        "{} with tokio",
        rustc_version_runtime::version_meta().short_version_string
    ),
});

impl From<&ClientMetadata> for Document {
    fn from(metadata: &ClientMetadata) -> Self {
        let mut doc = Document::new();

        if let Some(ref application) = metadata.application {
            doc.insert("application", doc! { "name": application.name.clone() });
        }

        doc.insert(
            "driver",
            doc! {
                "name": metadata.driver.name.clone(),
                "version": metadata.driver.version.clone(),
            },
        );

        let mut os_doc = doc! { "type": metadata.os.os_type.clone() };
        if let Some(ref name) = metadata.os.name {
            os_doc.insert("name", name.clone());
        }
        os_doc.insert("architecture", metadata.os.architecture.clone());
        doc.insert("os", os_doc);

        doc.insert("platform", metadata.platform.clone());

        doc
    }
}

/// Options used to construct a `Handshaker`.
#[derive(Clone, Debug, Default)]
pub(crate) struct HandshakerOptions {
    /// The application name specified by the user.
    pub(crate) app_name: Option<String>,

    /// The compressors the user has indicated, in order of preference.
    pub(crate) compressors: Option<Vec<Compressor>>,

    /// The credential to authenticate new connections with.
    pub(crate) credential: Option<Credential>,
}

/// Performs the part of connection establishment that happens after the TCP
/// (and TLS, if applicable) connect: the `hello` exchange, compression
/// negotiation, and authentication.
#[derive(Clone, Debug)]
pub(crate) struct Handshaker {
    /// The hello command to send, with the `client` metadata and compression
    /// offer baked in.
    command: Command,

    credential: Option<Credential>,

    compressors: Option<Vec<Compressor>>,
}

impl Handshaker {
    /// Creates a new Handshaker.
    pub(crate) fn new(options: HandshakerOptions) -> Self {
        let mut metadata = BASE_CLIENT_METADATA.clone();
        if let Some(app_name) = options.app_name {
            metadata.application = Some(AppMetadata { name: app_name });
        }

        let mut command = hello_command(None, None);
        command.body.insert("client", Document::from(&metadata));

        if let Some(ref compressors) = options.compressors {
            command.body.insert(
                "compression",
                compressors
                    .iter()
                    .map(|compressor| Bson::String(compressor.name().to_string()))
                    .collect::<Vec<_>>(),
            );
        }

        Self {
            command,
            credential: options.credential,
            compressors: options.compressors,
        }
    }

    /// Runs the handshake on the given connection, negotiating compression
    /// and authenticating with the configured credential.
    pub(crate) async fn handshake(&self, conn: &mut Connection) -> Result<HelloReply> {
        let mut command = self.command.clone();

        // Request mechanism negotiation and attempt speculative
        // authentication to save a round trip on SCRAM and X.509.
        let client_first = match self.credential {
            Some(ref credential) => {
                credential.append_needed_mechanism_negotiation(&mut command.body);

                let client_first = credential.build_speculative_client_first()?;
                if let Some(ref client_first) = client_first {
                    command
                        .body
                        .insert("speculativeAuthenticate", client_first.to_document());
                }
                client_first
            }
            None => None,
        };

        let hello_reply = self.run(conn, command).await?;

        if let Some(ref credential) = self.credential {
            let server_first = hello_reply.command_response.speculative_authenticate.clone();
            let mechanism = match credential.mechanism {
                Some(ref mechanism) => mechanism.clone(),
                None => AuthMechanism::from_stream_description(conn.stream_description()?),
            };
            mechanism
                .authenticate_stream(conn, credential, client_first.map(|cf| (cf, server_first)))
                .await?;
        }

        Ok(hello_reply)
    }

    /// Runs the handshake without authenticating, as used for the dedicated
    /// monitoring connections.
    pub(crate) async fn handshake_without_auth(&self, conn: &mut Connection) -> Result<HelloReply> {
        self.run(conn, self.command.clone()).await
    }

    async fn run(&self, conn: &mut Connection, command: Command) -> Result<HelloReply> {
        let hello_reply = run_hello(conn, command).await?;

        conn.stream_description = Some(StreamDescription::from_hello_reply(&hello_reply));

        // Use the first compressor in the user's preference order that the
        // server also supports.
        if let (Some(server_compressors), Some(client_compressors)) = (
            hello_reply.command_response.compressors.as_ref(),
            self.compressors.as_ref(),
        ) {
            conn.compressor = client_compressors
                .iter()
                .find(|compressor| {
                    server_compressors
                        .iter()
                        .any(|name| name == compressor.name())
                })
                .cloned();
        }

        Ok(hello_reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_document_shape() {
        let doc = Document::from(&*BASE_CLIENT_METADATA);
        assert_eq!(
            doc.get_document("driver").unwrap().get_str("name"),
            Ok("mongolite")
        );
        assert!(doc.get_document("os").unwrap().contains_key("type"));
        assert!(doc.contains_key("platform"));
    }

    #[test]
    fn app_name_included() {
        let handshaker = Handshaker::new(HandshakerOptions {
            app_name: Some("reporting".to_string()),
            compressors: None,
            credential: None,
        });
        let client = handshaker.command.body.get_document("client").unwrap();
        assert_eq!(
            client.get_document("application").unwrap().get_str("name"),
            Ok("reporting")
        );
    }
}
