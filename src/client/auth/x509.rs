use crate::{
    bson::{doc, Document},
    client::auth::Credential,
    cmap::{Command, Connection},
    error::{Error, Result},
};

/// Constructs the `authenticate` command for MONGODB-X509, which doubles as
/// the speculative authentication document in the handshake. The username is
/// optional; when omitted the server derives it from the client certificate's
/// subject name.
pub(super) fn build_client_first(credential: &Credential) -> Document {
    let mut auth_command_doc = doc! {
        "authenticate": 1,
        "mechanism": "MONGODB-X509",
    };

    if let Some(ref username) = credential.username {
        auth_command_doc.insert("user", username.clone());
    }

    auth_command_doc
}

/// Performs X.509 authentication on the given connection. The TLS layer must
/// have presented a client certificate for this to succeed.
pub(crate) async fn authenticate_stream(
    conn: &mut Connection,
    credential: &Credential,
) -> Result<()> {
    let command = Command::new("authenticate", "$external", build_client_first(credential));

    let response = conn
        .send_command(command, None)
        .await
        .map_err(|e| Error::authentication_error("MONGODB-X509", &e.to_string()))?;
    response
        .validate()
        .map_err(|e| Error::authentication_error("MONGODB-X509", &e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_first_includes_user_when_present() {
        let with_user = build_client_first(
            &Credential::builder()
                .username("CN=client,OU=test")
                .build(),
        );
        assert_eq!(with_user.get_str("user"), Ok("CN=client,OU=test"));

        let without_user = build_client_first(&Credential::default());
        assert!(!without_user.contains_key("user"));
        assert_eq!(without_user.get_str("mechanism"), Ok("MONGODB-X509"));
    }
}
