use bitflags::bitflags;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{
    header::{Header, OpCode},
    next_request_id,
};
use crate::{
    bson::{de, ser, Document},
    compression::{decompress, Compressor},
    error::{Error, ErrorKind, Result},
};

bitflags! {
    /// Represents the bitwise flags for an OP_MSG as defined in the spec.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) struct MessageFlags: u32 {
        const CHECKSUM_PRESENT = 0b_0000_0000_0000_0000_0000_0000_0000_0001;
        const MORE_TO_COME     = 0b_0000_0000_0000_0000_0000_0000_0000_0010;
        const EXHAUST_ALLOWED  = 0b_0000_0000_0000_0001_0000_0000_0000_0000;
    }
}

/// A payload type 1 section: a named sequence of documents carried
/// out-of-band from the command body, used for large write batches.
#[derive(Clone, Debug)]
pub(crate) struct DocumentSequence {
    pub(crate) identifier: String,
    pub(crate) documents: Vec<Document>,
}

/// Represents an OP_MSG wire protocol operation.
#[derive(Clone, Debug)]
pub(crate) struct Message {
    pub(crate) request_id: Option<i32>,
    pub(crate) response_to: i32,
    pub(crate) flags: MessageFlags,
    pub(crate) document_payload: Document,
    pub(crate) document_sequences: Vec<DocumentSequence>,
    pub(crate) checksum: Option<u32>,
}

impl Message {
    /// Creates a new `Message` carrying the given command body.
    pub(crate) fn new(document_payload: Document, request_id: Option<i32>) -> Self {
        Self {
            request_id,
            response_to: 0,
            flags: MessageFlags::empty(),
            document_payload,
            document_sequences: Vec::new(),
            checksum: None,
        }
    }

    /// Gets this message's command document. Document sequences, if any, are
    /// folded back into the body as arrays, which yields the logical command
    /// as the server sees it.
    pub(crate) fn single_document_response(self) -> Result<Document> {
        let mut document = self.document_payload;
        for sequence in self.document_sequences {
            document.insert(sequence.identifier, sequence.documents);
        }
        Ok(document)
    }

    /// Reads bytes from `reader` and deserializes them into a Message,
    /// transparently unwrapping an OP_COMPRESSED envelope if present.
    pub(crate) async fn read_from<R: AsyncRead + Unpin + Send>(
        reader: &mut R,
        max_message_size_bytes: i32,
    ) -> Result<Self> {
        let header = Header::read_from(reader).await?;
        if header.length < Header::LENGTH as i32 || header.length > max_message_size_bytes {
            return Err(Error::invalid_response(format!(
                "server indicated a reply of {} bytes, which exceeds the maximum message size",
                header.length
            )));
        }

        let mut body = vec![0u8; header.length as usize - Header::LENGTH];
        reader.read_exact(&mut body).await?;

        match header.op_code {
            OpCode::Message => Self::parse_body(header, body.as_slice()),
            OpCode::Compressed => {
                let mut slice = body.as_slice();
                let original_op_code = read_i32(&mut slice)?;
                let _uncompressed_size = read_i32(&mut slice)?;
                let compressor_id = read_u8(&mut slice)?;
                if original_op_code != OpCode::Message as i32 {
                    return Err(Error::invalid_response(format!(
                        "expected OP_COMPRESSED to wrap an OP_MSG, got opcode {}",
                        original_op_code
                    )));
                }
                let decompressed = decompress(compressor_id, slice)?;
                Self::parse_body(header, decompressed.as_slice())
            }
            other => Err(Error::invalid_response(format!(
                "expected an OP_MSG response, got {:?}",
                other
            ))),
        }
    }

    fn parse_body(header: Header, mut body: &[u8]) -> Result<Self> {
        let flags = MessageFlags::from_bits_truncate(read_u32(&mut body)?);

        let mut document_payload = None;
        let mut document_sequences = Vec::new();
        let mut checksum = None;

        loop {
            if flags.contains(MessageFlags::CHECKSUM_PRESENT) && body.len() == 4 {
                checksum = Some(read_u32(&mut body)?);
                break;
            }
            if body.is_empty() {
                break;
            }

            match read_u8(&mut body)? {
                0 => {
                    let document = read_prefixed_document(&mut body)?;
                    if document_payload.replace(document).is_some() {
                        return Err(Error::invalid_response(
                            "reply contained multiple payload type 0 sections",
                        ));
                    }
                }
                1 => {
                    let size = read_i32(&mut body)?;
                    if size < 4 || size as usize - 4 > body.len() {
                        return Err(Error::invalid_response(
                            "invalid document sequence section length",
                        ));
                    }
                    let (mut section, rest) = body.split_at(size as usize - 4);
                    body = rest;

                    let identifier = read_cstring(&mut section)?;
                    let mut documents = Vec::new();
                    while !section.is_empty() {
                        documents.push(read_prefixed_document(&mut section)?);
                    }
                    document_sequences.push(DocumentSequence {
                        identifier,
                        documents,
                    });
                }
                other => {
                    return Err(Error::invalid_response(format!(
                        "invalid payload section type: {}",
                        other
                    )));
                }
            }
        }

        let document_payload = document_payload.ok_or_else(|| {
            Error::invalid_response("no body section received from server")
        })?;

        Ok(Self {
            request_id: Some(header.request_id),
            response_to: header.response_to,
            flags,
            document_payload,
            document_sequences,
            checksum,
        })
    }

    /// Serializes the Message to bytes and writes them to `writer`.
    pub(crate) async fn write_to<W: AsyncWrite + Unpin + Send>(&self, writer: &mut W) -> Result<()> {
        let sections = self.sections_bytes()?;

        let total_length = Header::LENGTH
            + std::mem::size_of::<u32>()
            + sections.len()
            + self.checksum.map(|_| 4).unwrap_or(0);

        let header = Header {
            length: int_len(total_length)?,
            request_id: self.request_id.unwrap_or_else(next_request_id),
            response_to: self.response_to,
            op_code: OpCode::Message,
        };

        header.write_to(writer).await?;
        writer.write_all(&self.flags.bits().to_le_bytes()).await?;
        writer.write_all(&sections).await?;

        if let Some(checksum) = self.checksum {
            writer.write_all(&checksum.to_le_bytes()).await?;
        }

        writer.flush().await?;

        Ok(())
    }

    /// Serializes the Message, compresses its payload with the given
    /// compressor, and writes the resulting OP_COMPRESSED message to
    /// `writer`.
    pub(crate) async fn write_op_compressed_to<W: AsyncWrite + Unpin + Send>(
        &self,
        writer: &mut W,
        compressor: &Compressor,
    ) -> Result<()> {
        let mut payload = self.flags.bits().to_le_bytes().to_vec();
        payload.extend(self.sections_bytes()?);

        let uncompressed_size = int_len(payload.len())?;
        let compressed = compressor.compress(&payload)?;

        let total_length = Header::LENGTH + 4 + 4 + 1 + compressed.len();
        let header = Header {
            length: int_len(total_length)?,
            request_id: self.request_id.unwrap_or_else(next_request_id),
            response_to: self.response_to,
            op_code: OpCode::Compressed,
        };

        header.write_to(writer).await?;
        writer
            .write_all(&(OpCode::Message as i32).to_le_bytes())
            .await?;
        writer.write_all(&uncompressed_size.to_le_bytes()).await?;
        writer.write_all(&[compressor.id()]).await?;
        writer.write_all(&compressed).await?;
        writer.flush().await?;

        Ok(())
    }

    /// The total length this message will occupy on the wire, uncompressed.
    pub(crate) fn encoded_len(&self) -> Result<usize> {
        Ok(Header::LENGTH + std::mem::size_of::<u32>() + self.sections_bytes()?.len())
    }

    fn sections_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();

        bytes.push(0u8);
        ser::write_document(&mut bytes, &self.document_payload)?;

        for sequence in &self.document_sequences {
            bytes.push(1u8);

            let size_offset = bytes.len();
            bytes.extend_from_slice(&[0u8; 4]);
            ser::write_cstring(&mut bytes, &sequence.identifier)?;
            for document in &sequence.documents {
                ser::write_document(&mut bytes, document)?;
            }

            let size = int_len(bytes.len() - size_offset)?;
            bytes[size_offset..size_offset + 4].copy_from_slice(&size.to_le_bytes());
        }

        Ok(bytes)
    }
}

fn int_len(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| {
        ErrorKind::DocumentTooLarge {
            message: "wire message length overflows an i32".to_string(),
        }
        .into()
    })
}

fn read_u8(reader: &mut &[u8]) -> Result<u8> {
    match reader.split_first() {
        Some((byte, rest)) => {
            *reader = rest;
            Ok(*byte)
        }
        None => Err(truncated()),
    }
}

fn read_u32(reader: &mut &[u8]) -> Result<u32> {
    if reader.len() < 4 {
        return Err(truncated());
    }
    let (bytes, rest) = reader.split_at(4);
    let value = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    *reader = rest;
    Ok(value)
}

fn read_i32(reader: &mut &[u8]) -> Result<i32> {
    Ok(read_u32(reader)? as i32)
}

fn read_cstring(reader: &mut &[u8]) -> Result<String> {
    let nul = reader
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(truncated)?;
    let (bytes, rest) = reader.split_at(nul);
    let s = std::str::from_utf8(bytes)
        .map_err(|_| Error::invalid_response("invalid UTF-8 in section identifier"))?
        .to_string();
    *reader = &rest[1..];
    Ok(s)
}

fn read_prefixed_document(reader: &mut &[u8]) -> Result<Document> {
    de::read_document(reader).map_err(|e| Error::invalid_response(e.to_string()))
}

fn truncated() -> Error {
    Error::invalid_response("reply ended before the advertised message length")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bson::doc;

    const DEFAULT_MAX_MESSAGE_SIZE_BYTES: i32 = 48 * 1024 * 1024;

    async fn round_trip(message: &Message) -> Message {
        let mut bytes = Vec::new();
        message.write_to(&mut bytes).await.unwrap();
        Message::read_from(&mut bytes.as_slice(), DEFAULT_MAX_MESSAGE_SIZE_BYTES)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn body_round_trip() {
        let message = Message::new(doc! { "find": "coll", "$db": "db" }, Some(3));
        let parsed = round_trip(&message).await;

        assert_eq!(parsed.document_payload, message.document_payload);
        assert_eq!(parsed.flags, MessageFlags::empty());
        assert!(parsed.document_sequences.is_empty());
    }

    #[tokio::test]
    async fn document_sequence_round_trip() {
        let mut message = Message::new(doc! { "insert": "coll", "$db": "db" }, Some(4));
        message.document_sequences.push(DocumentSequence {
            identifier: "documents".to_string(),
            documents: vec![doc! { "_id": 1 }, doc! { "_id": 2 }],
        });

        let parsed = round_trip(&message).await;
        assert_eq!(parsed.document_sequences.len(), 1);
        assert_eq!(parsed.document_sequences[0].identifier, "documents");
        assert_eq!(
            parsed.document_sequences[0].documents,
            vec![doc! { "_id": 1 }, doc! { "_id": 2 }]
        );

        // the logical command folds sequences back into the body
        let command = parsed.single_document_response().unwrap();
        assert_eq!(
            command,
            doc! {
                "insert": "coll",
                "$db": "db",
                "documents": [ { "_id": 1 }, { "_id": 2 } ],
            }
        );
    }

    #[tokio::test]
    async fn request_id_is_preserved() {
        let message = Message::new(doc! { "ping": 1 }, Some(42));
        let mut bytes = Vec::new();
        message.write_to(&mut bytes).await.unwrap();

        let header = Header::read_from(&mut bytes.as_slice()).await.unwrap();
        assert_eq!(header.request_id, 42);
        assert_eq!(header.op_code, OpCode::Message);
    }

    #[tokio::test]
    async fn oversized_reply_is_rejected() {
        let message = Message::new(doc! { "ping": 1 }, Some(1));
        let mut bytes = Vec::new();
        message.write_to(&mut bytes).await.unwrap();

        let result = Message::read_from(&mut bytes.as_slice(), 16).await;
        assert!(result.is_err());
    }

    #[cfg(feature = "zlib-compression")]
    #[tokio::test]
    async fn compressed_round_trip() {
        let compressor = Compressor::Zlib { level: None };
        let message = Message::new(doc! { "find": "coll", "filter": { "x": 1 } }, Some(7));

        let mut bytes = Vec::new();
        message
            .write_op_compressed_to(&mut bytes, &compressor)
            .await
            .unwrap();

        let header = Header::read_from(&mut bytes.as_slice()).await.unwrap();
        assert_eq!(header.op_code, OpCode::Compressed);

        let parsed = Message::read_from(&mut bytes.as_slice(), DEFAULT_MAX_MESSAGE_SIZE_BYTES)
            .await
            .unwrap();
        assert_eq!(parsed.document_payload, message.document_payload);
    }
}
