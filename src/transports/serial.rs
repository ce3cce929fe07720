//! A serial-port carrier, out of scope per §1.

pub struct SerialTransport;

impl super::Transport for SerialTransport {
    fn name(&self) -> &'static str {
        "serial"
    }
}

impl SerialTransport {
    pub fn new() -> Self {
        SerialTransport
    }

    pub async fn connect(&self, _device_path: &str) -> Result<(), crate::error::TransportError> {
        Err(super::unsupported("serial"))
    }
}
