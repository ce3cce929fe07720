//! A named-pipe/file-backed carrier, out of scope per §1.

pub struct FileTransport;

impl super::Transport for FileTransport {
    fn name(&self) -> &'static str {
        "file"
    }
}

impl FileTransport {
    pub fn new() -> Self {
        FileTransport
    }

    pub async fn connect(&self, _path: &str) -> Result<(), crate::error::TransportError> {
        Err(super::unsupported("file"))
    }
}
