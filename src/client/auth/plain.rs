use crate::{
    bson::Bson,
    client::auth::{
        sasl::{SaslContinue, SaslResponse, SaslStart},
        AuthMechanism,
        Credential,
    },
    cmap::Connection,
    error::{Error, Result},
};

/// Performs PLAIN (LDAP pass-through) authentication: a single `saslStart`
/// carrying `\0username\0password`.
pub(crate) async fn authenticate_stream(
    conn: &mut Connection,
    credential: &Credential,
) -> Result<()> {
    let source = match credential.source.as_deref() {
        Some("$external") | None => "$external",
        Some(..) => {
            return Err(Error::authentication_error(
                "PLAIN",
                "only $external may be specified as an auth source",
            ));
        }
    };

    let username = credential
        .username
        .as_ref()
        .ok_or_else(|| Error::authentication_error("PLAIN", "no username supplied"))?;

    let password = credential
        .password
        .as_ref()
        .ok_or_else(|| Error::authentication_error("PLAIN", "no password supplied"))?;

    let mut response = SaslResponse::parse(
        "PLAIN",
        conn.send_command(
            SaslStart::new(
                source.to_string(),
                AuthMechanism::Plain,
                payload_bytes(username, password),
            )
            .into_command(),
            None,
        )
        .await?,
    )?;

    // some LDAP proxies require an empty continuation round
    while !response.done {
        let command = SaslContinue::new(
            source.to_string(),
            response.conversation_id.clone(),
            Vec::new(),
        )
        .into_command();
        let previous_id = response.conversation_id.clone();
        response = SaslResponse::parse("PLAIN", conn.send_command(command, None).await?)?;

        if response.conversation_id != previous_id {
            return Err(Error::authentication_error(
                "PLAIN",
                "mismatched conversationId's",
            ));
        }
    }

    Ok(())
}

fn payload_bytes(username: &str, password: &str) -> Vec<u8> {
    let mut bytes = vec![0u8];
    bytes.extend(username.as_bytes());

    bytes.push(0);
    bytes.extend(password.as_bytes());

    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_form() {
        assert_eq!(payload_bytes("user", "pencil"), b"\0user\0pencil");
    }
}
