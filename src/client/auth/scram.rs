use std::{
    borrow::Cow,
    collections::HashMap,
    fmt,
    ops::{BitXor, Range},
    str,
    sync::{LazyLock, RwLock},
};

use hmac::{
    digest::{FixedOutput, KeyInit, MacMarker, Update},
    Hmac,
    Mac,
};
use md5::Md5;
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::{
    bson::{base64_decode, base64_encode, Bson, Document},
    client::auth::{
        self,
        sasl::{SaslContinue, SaslResponse, SaslStart},
        AuthMechanism,
        Credential,
    },
    cmap::Connection,
    error::{Error, Result},
};

// The single letter attribute keys in SCRAM messages.
const ITERATION_COUNT_KEY: char = 'i';
const ERROR_KEY: char = 'e';
const PROOF_KEY: char = 'p';
const VERIFIER_KEY: char = 'v';
const NONCE_KEY: char = 'r';
const SALT_KEY: char = 's';
const CHANNEL_BINDING_KEY: char = 'c';
const USERNAME_KEY: char = 'n';

/// Constant specifying that we won't be using channel binding.
const NO_CHANNEL_BINDING: char = 'n';

/// The minimum number of iterations of the hash function that we will accept
/// from the server.
const MIN_ITERATION_COUNT: u32 = 4096;

/// Cache of pre-computed salted passwords: PBKDF2 is deliberately expensive,
/// and every new connection authenticates with the same credential.
static CREDENTIAL_CACHE: LazyLock<RwLock<HashMap<CacheEntry, Vec<u8>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

#[derive(Hash, Eq, PartialEq)]
struct CacheEntry {
    password: String,
    salt: Vec<u8>,
    i: u32,
    mechanism: ScramVersion,
}

/// The versions of SCRAM supported by the driver (classified according to the
/// hash function used).
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub(crate) enum ScramVersion {
    Sha1,
    Sha256,
}

impl ScramVersion {
    /// Constructs the client first message of the conversation.
    pub(super) fn build_client_first(&self, credential: &Credential) -> Result<ClientFirst> {
        let username = credential
            .username
            .as_ref()
            .ok_or_else(|| Error::authentication_error("SCRAM", "no username supplied"))?;

        Ok(ClientFirst::new(
            credential.resolved_source(),
            username,
            auth::generate_nonce(),
        ))
    }

    /// Perform SCRAM authentication for a given stream. If the server replied
    /// to a speculative attempt in the handshake, the conversation resumes
    /// from that reply.
    pub(crate) async fn authenticate_stream(
        &self,
        conn: &mut Connection,
        credential: &Credential,
        speculative: Option<(ClientFirst, Document)>,
    ) -> Result<()> {
        let password = credential
            .password
            .as_ref()
            .ok_or_else(|| Error::authentication_error("SCRAM", "no password supplied"))?;

        if credential.mechanism_properties.is_some() {
            return Err(Error::authentication_error(
                "SCRAM",
                "mechanism properties MUST NOT be specified",
            ));
        }

        let source = credential.resolved_source().to_string();

        let (client_first, server_first_response) = match speculative {
            Some((client_first, server_first_doc)) => (
                client_first,
                SaslResponse::parse_doc(self.mechanism_str(), server_first_doc)?,
            ),
            None => {
                let client_first = self.build_client_first(credential)?;
                let command = client_first.to_command(self);
                let response = conn.send_command(command, None).await?;
                (
                    client_first,
                    SaslResponse::parse(self.mechanism_str(), response)?,
                )
            }
        };

        let server_first = ServerFirst::parse(
            server_first_response.conversation_id,
            server_first_response.done,
            &server_first_response.payload,
        )?;
        server_first.validate(client_first.nonce())?;

        let cache_entry_key = CacheEntry {
            password: password.to_string(),
            salt: server_first.salt().to_vec(),
            i: server_first.i(),
            mechanism: self.clone(),
        };
        let cached_salted_password = CREDENTIAL_CACHE
            .read()
            .map_or(None, |cache| cache.get(&cache_entry_key).cloned());
        let (should_update_cache, salted_password) = match cached_salted_password {
            Some(password) => (false, password),
            None => (
                true,
                self.compute_salted_password(
                    client_first.username(),
                    password,
                    server_first.i(),
                    server_first.salt(),
                )?,
            ),
        };

        let client_final = ClientFinal::new(
            salted_password.as_slice(),
            &client_first,
            &server_first,
            self,
        )?;

        let command = SaslContinue::new(
            source.clone(),
            server_first.conversation_id().clone(),
            client_final.message().as_bytes().to_vec(),
        )
        .into_command();
        let response = conn.send_command(command, None).await?;
        let server_final_response = SaslResponse::parse(self.mechanism_str(), response)?;

        let server_final = ServerFinal::parse(
            server_final_response.conversation_id,
            server_final_response.done,
            &server_final_response.payload,
        )?;
        server_final.validate(salted_password.as_slice(), &client_final, self)?;

        // Some servers require an extra round trip of no-ops to finish the
        // conversation; `skipEmptyExchange` avoids it on servers that allow
        // skipping.
        if !server_final.done() {
            let command = SaslContinue::new(
                source,
                server_final.conversation_id().clone(),
                Vec::new(),
            )
            .into_command();
            let response = conn.send_command(command, None).await?;
            let server_noop = SaslResponse::parse(self.mechanism_str(), response)?;

            if server_noop.conversation_id != *server_final.conversation_id() {
                return Err(Error::authentication_error(
                    self.mechanism_str(),
                    "mismatched conversationId's",
                ));
            }

            if !server_noop.done {
                return Err(Error::authentication_error(
                    self.mechanism_str(),
                    "authentication did not complete successfully",
                ));
            }
        }

        if should_update_cache {
            if let Ok(mut cache) = CREDENTIAL_CACHE.write() {
                cache.entry(cache_entry_key).or_insert(salted_password);
            }
        }

        Ok(())
    }

    fn mechanism_str(&self) -> &'static str {
        match self {
            ScramVersion::Sha1 => AuthMechanism::ScramSha1.as_str(),
            ScramVersion::Sha256 => AuthMechanism::ScramSha256.as_str(),
        }
    }

    /// HMAC function used as part of SCRAM authentication.
    fn hmac(&self, key: &[u8], input: &[u8]) -> Result<Vec<u8>> {
        match self {
            ScramVersion::Sha1 => mac::<Hmac<Sha1>>(key, input),
            ScramVersion::Sha256 => mac::<Hmac<Sha256>>(key, input),
        }
    }

    /// Compute the HMAC of the given key and input and verify it matches the
    /// given signature.
    fn hmac_verify(&self, key: &[u8], input: &[u8], signature: &[u8]) -> Result<()> {
        match self {
            ScramVersion::Sha1 => mac_verify::<Hmac<Sha1>>(key, input, signature),
            ScramVersion::Sha256 => mac_verify::<Hmac<Sha256>>(key, input, signature),
        }
    }

    /// The "H" function defined in the SCRAM RFC.
    fn h(&self, str: &[u8]) -> Vec<u8> {
        match self {
            ScramVersion::Sha1 => hash::<Sha1>(str),
            ScramVersion::Sha256 => hash::<Sha256>(str),
        }
    }

    /// The "Hi" function as defined in the SCRAM RFC.
    fn h_i(&self, str: &str, salt: &[u8], iterations: u32) -> Result<Vec<u8>> {
        match self {
            ScramVersion::Sha1 => h_i::<Hmac<Sha1>>(str, salt, iterations, 160 / 8),
            ScramVersion::Sha256 => h_i::<Hmac<Sha256>>(str, salt, iterations, 256 / 8),
        }
    }

    /// Computes the salted password according to the SCRAM RFC and the
    /// MongoDB-specific password hashing algorithm.
    fn compute_salted_password(
        &self,
        username: &str,
        password: &str,
        i: u32,
        salt: &[u8],
    ) -> Result<Vec<u8>> {
        let normalized_password: Cow<'_, str> = match self {
            ScramVersion::Sha1 => {
                let mut md5 = Md5::new();
                Digest::update(&mut md5, format!("{}:mongo:{}", username, password));
                Cow::Owned(hex::encode(md5.finalize()))
            }
            ScramVersion::Sha256 => match stringprep::saslprep(password) {
                Ok(p) => p,
                Err(_) => {
                    return Err(Error::authentication_error(
                        "SCRAM-SHA-256",
                        "saslprep failure",
                    ))
                }
            },
        };

        self.h_i(normalized_password.as_ref(), salt, i)
    }
}

impl fmt::Display for ScramVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.mechanism_str())
    }
}

fn xor(lhs: &[u8], rhs: &[u8]) -> Vec<u8> {
    debug_assert_eq!(lhs.len(), rhs.len());

    lhs.iter()
        .zip(rhs.iter())
        .map(|(l, r)| l.bitxor(r))
        .collect()
}

fn mac<M: Mac + KeyInit>(key: &[u8], input: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <M as Mac>::new_from_slice(key)
        .map_err(|_| Error::unknown_authentication_error("SCRAM"))?;
    mac.update(input);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn mac_verify<M: Mac + KeyInit>(key: &[u8], input: &[u8], signature: &[u8]) -> Result<()> {
    let mut mac = <M as Mac>::new_from_slice(key)
        .map_err(|_| Error::unknown_authentication_error("SCRAM"))?;
    mac.update(input);
    mac.verify_slice(signature)
        .map_err(|_| Error::authentication_error("SCRAM", "Authentication failed."))
}

fn hash<D: Digest>(val: &[u8]) -> Vec<u8> {
    let mut hash = D::new();
    hash.update(val);
    hash.finalize().to_vec()
}

fn h_i<M: KeyInit + Update + FixedOutput + MacMarker + Clone + Sync>(
    str: &str,
    salt: &[u8],
    iterations: u32,
    output_size: usize,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; output_size];
    pbkdf2::pbkdf2::<M>(str.as_bytes(), salt, iterations, buf.as_mut_slice())
        .map_err(|_| Error::unknown_authentication_error("SCRAM"))?;
    Ok(buf)
}

/// Parses a string slice of the form "<expected_key>=<body>" into "<body>",
/// if possible.
fn parse_kvp(str: &str, expected_key: char) -> Result<String> {
    let mut chars = str.chars();
    if chars.next() != Some(expected_key) || chars.next() != Some('=') {
        Err(Error::invalid_authentication_response("SCRAM"))
    } else {
        Ok(chars.collect())
    }
}

/// Model of the first message sent by the client.
#[derive(Clone, Debug)]
pub(crate) struct ClientFirst {
    pub(super) source: String,

    message: String,

    gs2_header: Range<usize>,

    bare: Range<usize>,

    nonce: String,
}

impl ClientFirst {
    fn new(source: &str, username: &str, nonce: String) -> Self {
        let gs2_header = format!("{},,", NO_CHANNEL_BINDING);
        let bare = format!(
            "{}={},{}={}",
            USERNAME_KEY, username, NONCE_KEY, nonce
        );
        let full = format!("{}{}", &gs2_header, &bare);
        let end = full.len();
        ClientFirst {
            source: source.to_string(),
            message: full,
            gs2_header: Range {
                start: 0,
                end: gs2_header.len(),
            },
            bare: Range {
                start: gs2_header.len(),
                end,
            },
            nonce,
        }
    }

    fn bare_message(&self) -> &str {
        &self.message[self.bare.clone()]
    }

    fn gs2_header(&self) -> &str {
        &self.message[self.gs2_header.clone()]
    }

    fn message(&self) -> &str {
        &self.message[..]
    }

    fn nonce(&self) -> &str {
        self.nonce.as_str()
    }

    fn username(&self) -> &str {
        // the bare message is "n=<username>,r=<nonce>"
        let bare = self.bare_message();
        let end = bare.rfind(",r=").unwrap_or(bare.len());
        &bare[2..end]
    }

    pub(super) fn to_command(&self, scram: &ScramVersion) -> crate::cmap::Command {
        let mechanism = match scram {
            ScramVersion::Sha1 => AuthMechanism::ScramSha1,
            ScramVersion::Sha256 => AuthMechanism::ScramSha256,
        };
        SaslStart::new(
            self.source.clone(),
            mechanism,
            self.message().as_bytes().to_vec(),
        )
        .into_command()
    }
}

/// Model of the first message received from the server.
///
/// This MUST be validated before sending the `ClientFinal` message back to
/// the server.
struct ServerFirst {
    conversation_id: Bson,
    done: bool,
    message: String,
    nonce: String,
    salt: Vec<u8>,
    i: u32,
}

impl ServerFirst {
    fn parse(conversation_id: Bson, done: bool, payload: &[u8]) -> Result<Self> {
        let message = str::from_utf8(payload)
            .map_err(|_| Error::invalid_authentication_response("SCRAM"))?;

        let parts: Vec<&str> = message.split(',').collect();

        if parts.len() < 3 {
            return Err(Error::invalid_authentication_response("SCRAM"));
        }

        let full_nonce = parse_kvp(parts[0], NONCE_KEY)?;

        let salt = base64_decode(parse_kvp(parts[1], SALT_KEY)?.as_str())
            .ok_or_else(|| Error::invalid_authentication_response("SCRAM"))?;

        let i: u32 = parse_kvp(parts[2], ITERATION_COUNT_KEY)?
            .parse()
            .map_err(|_| Error::authentication_error("SCRAM", "iteration count invalid"))?;

        Ok(ServerFirst {
            conversation_id,
            done,
            message: message.to_string(),
            nonce: full_nonce,
            salt,
            i,
        })
    }

    fn conversation_id(&self) -> &Bson {
        &self.conversation_id
    }

    fn message(&self) -> &str {
        self.message.as_str()
    }

    fn nonce(&self) -> &str {
        self.nonce.as_str()
    }

    fn salt(&self) -> &[u8] {
        self.salt.as_slice()
    }

    fn i(&self) -> u32 {
        self.i
    }

    fn validate(&self, nonce: &str) -> Result<()> {
        if self.done {
            Err(Error::authentication_error(
                "SCRAM",
                "handshake terminated early",
            ))
        } else if &self.nonce[0..nonce.len()] != nonce {
            Err(Error::authentication_error("SCRAM", "mismatched nonce"))
        } else if self.i < MIN_ITERATION_COUNT {
            Err(Error::authentication_error(
                "SCRAM",
                "iteration count too low",
            ))
        } else {
            Ok(())
        }
    }
}

/// Model of the final message sent by the client.
struct ClientFinal {
    message: String,
    auth_message: String,
}

impl ClientFinal {
    fn new(
        salted_password: &[u8],
        client_first: &ClientFirst,
        server_first: &ServerFirst,
        scram: &ScramVersion,
    ) -> Result<Self> {
        let client_key = scram.hmac(salted_password, b"Client Key")?;
        let stored_key = scram.h(client_key.as_slice());

        let without_proof = format!(
            "{}={},{}={}",
            CHANNEL_BINDING_KEY,
            base64_encode(client_first.gs2_header().as_bytes()),
            NONCE_KEY,
            server_first.nonce()
        );
        let auth_message = format!(
            "{},{},{}",
            client_first.bare_message(),
            server_first.message(),
            without_proof.as_str()
        );
        let client_signature = scram.hmac(stored_key.as_slice(), auth_message.as_bytes())?;

        // ClientProof := ClientKey XOR ClientSignature
        let client_proof =
            base64_encode(xor(client_key.as_slice(), client_signature.as_slice()).as_slice());

        let message = format!("{},{}={}", without_proof, PROOF_KEY, client_proof);

        Ok(ClientFinal {
            message,
            auth_message,
        })
    }

    fn message(&self) -> &str {
        self.message.as_str()
    }

    fn auth_message(&self) -> &str {
        self.auth_message.as_str()
    }
}

enum ServerFinalBody {
    Error(String),
    Verifier(String),
}

/// Model of the final message received from the server.
///
/// This MUST be validated before the authentication conversation is
/// considered successful.
struct ServerFinal {
    conversation_id: Bson,
    done: bool,
    body: ServerFinalBody,
}

impl ServerFinal {
    fn parse(conversation_id: Bson, done: bool, payload: &[u8]) -> Result<Self> {
        let message = str::from_utf8(payload)
            .map_err(|_| Error::invalid_authentication_response("SCRAM"))?;

        let first = message
            .chars()
            .next()
            .ok_or_else(|| Error::invalid_authentication_response("SCRAM"))?;

        let body = if first == ERROR_KEY {
            let error = parse_kvp(message, ERROR_KEY)?;
            ServerFinalBody::Error(error)
        } else if first == VERIFIER_KEY {
            let verifier = parse_kvp(message, VERIFIER_KEY)?;
            ServerFinalBody::Verifier(verifier)
        } else {
            return Err(Error::invalid_authentication_response("SCRAM"));
        };

        Ok(ServerFinal {
            conversation_id,
            done,
            body,
        })
    }

    fn validate(
        &self,
        salted_password: &[u8],
        client_final: &ClientFinal,
        scram: &ScramVersion,
    ) -> Result<()> {
        match self.body {
            ServerFinalBody::Verifier(ref body) => {
                let server_key = scram.hmac(salted_password, b"Server Key")?;
                let body_decoded = base64_decode(body)
                    .ok_or_else(|| Error::invalid_authentication_response("SCRAM"))?;

                scram.hmac_verify(
                    server_key.as_slice(),
                    client_final.auth_message().as_bytes(),
                    body_decoded.as_slice(),
                )
            }
            ServerFinalBody::Error(ref err) => {
                Err(Error::authentication_error("SCRAM", err.as_str()))
            }
        }
    }

    fn conversation_id(&self) -> &Bson {
        &self.conversation_id
    }

    fn done(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_kvp_shapes() {
        assert_eq!(parse_kvp("r=abc", 'r').unwrap(), "abc");
        assert_eq!(parse_kvp("i=4096", 'i').unwrap(), "4096");
        assert!(parse_kvp("x=abc", 'r').is_err());
        assert!(parse_kvp("", 'r').is_err());
    }

    #[test]
    fn client_first_message_form() {
        let client_first = ClientFirst::new("admin", "user", "fyko+d2lbbFgONRv9qkxdawL".into());
        assert_eq!(
            client_first.message(),
            "n,,n=user,r=fyko+d2lbbFgONRv9qkxdawL"
        );
        assert_eq!(client_first.gs2_header(), "n,,");
        assert_eq!(
            client_first.bare_message(),
            "n=user,r=fyko+d2lbbFgONRv9qkxdawL"
        );
        assert_eq!(client_first.username(), "user");
    }

    #[test]
    fn server_first_validation() {
        let payload = b"r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096";
        let server_first = ServerFirst::parse(Bson::Int32(1), false, payload).unwrap();
        assert_eq!(server_first.i(), 4096);
        assert!(server_first.validate("fyko+d2lbbFgONRv9qkxdawL").is_ok());
        assert!(server_first.validate("someOtherNonce").is_err());

        let low_iterations = b"r=abcd,s=QSXCR+Q6sek8bf92,i=100";
        let server_first = ServerFirst::parse(Bson::Int32(1), false, low_iterations).unwrap();
        assert!(server_first.validate("abcd").is_err());
    }

    // Test vector from RFC 5802 section 5, adapted to verify the proof
    // construction machinery (MongoDB salts passwords differently, so the
    // RFC's SaltedPassword is used directly).
    #[test]
    fn rfc5802_client_proof() {
        let salt = base64_decode("QSXCR+Q6sek8bf92").unwrap();
        let salted_password =
            h_i::<Hmac<Sha1>>("pencil", &salt, 4096, 160 / 8).unwrap();
        assert_eq!(
            hex::encode(&salted_password),
            "1d96ee3a529b5a5f9e47c01f229a2cb8a6e15f7d"
        );

        let client_first = ClientFirst::new("admin", "user", "fyko+d2lbbFgONRv9qkxdawL".into());
        let server_first = ServerFirst::parse(
            Bson::Int32(1),
            false,
            b"r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096",
        )
        .unwrap();
        let client_final = ClientFinal::new(
            &salted_password,
            &client_first,
            &server_first,
            &ScramVersion::Sha1,
        )
        .unwrap();

        assert_eq!(
            client_final.message(),
            "c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,\
             p=v0X8v3Bz2T0CJGbJQyF0X+HI4Ts="
        );

        // and the server signature from the same vector verifies
        let server_final = ServerFinal::parse(
            Bson::Int32(1),
            true,
            b"v=rmF9pqV8S7suAoZWja4dJRkFsKQ=",
        )
        .unwrap();
        assert!(server_final
            .validate(&salted_password, &client_final, &ScramVersion::Sha1)
            .is_ok());
    }
}
