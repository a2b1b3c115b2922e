use uuid::Uuid;

/// A finished, tagged track ready for the download collaborator
///
/// Not `Clone`: the payload is handed over exactly once.
#[derive(Debug)]
pub struct EncodedArtifact {
    id: Uuid,
    bytes: Vec<u8>,
}

impl EncodedArtifact {
    pub const MIME_TYPE: &'static str = "audio/mpeg";

    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bytes,
        }
    }

    /// Retrievable reference, stored in `Track::url` on completion
    pub fn reference(&self) -> String {
        format!("blob:clipinc/{}", self.id)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the artifact, yielding the payload
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
